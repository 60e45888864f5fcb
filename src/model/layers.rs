use anyhow::{bail, Result};
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Adam hyperparameters shared by every parameter tensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdamParams {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl AdamParams {
    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..Self::default()
        }
    }
}

/// A weight matrix with its accumulated gradient and Adam moment estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param2 {
    pub value: Array2<f64>,
    pub(crate) grad: Array2<f64>,
    m: Array2<f64>,
    v: Array2<f64>,
}

impl Param2 {
    pub fn uniform(rows: usize, cols: usize, limit: f64, rng: &mut StdRng) -> Self {
        Self {
            value: Array2::random_using((rows, cols), Uniform::new(-limit, limit), rng),
            grad: Array2::zeros((rows, cols)),
            m: Array2::zeros((rows, cols)),
            v: Array2::zeros((rows, cols)),
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn param_count(&self) -> usize {
        self.value.len()
    }

    /// One Adam update from the accumulated gradient. `t` is the 1-based
    /// global step used for bias correction.
    pub fn step(&mut self, hp: &AdamParams, t: usize) {
        let t = t as i32;
        self.m = &self.m * hp.beta1 + &self.grad * (1.0 - hp.beta1);
        self.v = &self.v * hp.beta2 + &self.grad.mapv(|g| g * g) * (1.0 - hp.beta2);

        let m_hat = &self.m / (1.0 - hp.beta1.powi(t));
        let v_hat = &self.v / (1.0 - hp.beta2.powi(t));

        let update = m_hat / (v_hat.mapv(f64::sqrt) + hp.epsilon) * hp.learning_rate;
        self.value -= &update;
    }
}

/// A bias vector with its accumulated gradient and Adam moment estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param1 {
    pub value: Array1<f64>,
    pub(crate) grad: Array1<f64>,
    m: Array1<f64>,
    v: Array1<f64>,
}

impl Param1 {
    pub fn zeros(len: usize) -> Self {
        Self {
            value: Array1::zeros(len),
            grad: Array1::zeros(len),
            m: Array1::zeros(len),
            v: Array1::zeros(len),
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn param_count(&self) -> usize {
        self.value.len()
    }

    pub fn step(&mut self, hp: &AdamParams, t: usize) {
        let t = t as i32;
        self.m = &self.m * hp.beta1 + &self.grad * (1.0 - hp.beta1);
        self.v = &self.v * hp.beta2 + &self.grad.mapv(|g| g * g) * (1.0 - hp.beta2);

        let m_hat = &self.m / (1.0 - hp.beta1.powi(t));
        let v_hat = &self.v / (1.0 - hp.beta2.powi(t));

        let update = m_hat / (v_hat.mapv(f64::sqrt) + hp.epsilon) * hp.learning_rate;
        self.value -= &update;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Linear,
}

impl Activation {
    fn apply(&self, pre: &Array1<f64>) -> Array1<f64> {
        match self {
            Activation::Relu => pre.mapv(|v| if v > 0.0 { v } else { 0.0 }),
            Activation::Linear => pre.clone(),
        }
    }

    fn derivative(&self, pre: &Array1<f64>) -> Array1<f64> {
        match self {
            Activation::Relu => pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => Array1::ones(pre.len()),
        }
    }
}

#[derive(Debug, Clone)]
struct DenseCache {
    input: Array1<f64>,
    pre_activation: Array1<f64>,
}

/// Fully connected layer over a feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    pub weights: Param2,
    pub biases: Param1,
    pub activation: Activation,
    #[serde(skip)]
    cache: Option<DenseCache>,
}

impl Dense {
    pub fn new(input_size: usize, output_size: usize, activation: Activation, rng: &mut StdRng) -> Self {
        // He-style uniform init, matching the fan-in rule used elsewhere.
        let limit = (2.0 / input_size as f64).sqrt();
        Self {
            weights: Param2::uniform(output_size, input_size, limit, rng),
            biases: Param1::zeros(output_size),
            activation,
            cache: None,
        }
    }

    pub fn output_size(&self) -> usize {
        self.biases.value.len()
    }

    pub fn param_count(&self) -> usize {
        self.weights.param_count() + self.biases.param_count()
    }

    pub fn forward(&mut self, input: &Array1<f64>) -> Array1<f64> {
        let pre = self.weights.value.dot(input) + &self.biases.value;
        let out = self.activation.apply(&pre);
        self.cache = Some(DenseCache {
            input: input.clone(),
            pre_activation: pre,
        });
        out
    }

    /// Accumulates parameter gradients and returns the gradient with respect
    /// to the layer input.
    pub fn backward(&mut self, d_out: &Array1<f64>) -> Result<Array1<f64>> {
        let cache = match self.cache.take() {
            Some(cache) => cache,
            None => bail!("dense backward called before forward"),
        };

        let d_pre = d_out * &self.activation.derivative(&cache.pre_activation);

        let d_col = d_pre.view().insert_axis(Axis(1));
        let in_row = cache.input.view().insert_axis(Axis(0));
        self.weights.grad += &d_col.dot(&in_row);
        self.biases.grad += &d_pre;

        Ok(self.weights.value.t().dot(&d_pre))
    }

    pub fn zero_grads(&mut self) {
        self.weights.zero_grad();
        self.biases.zero_grad();
    }

    pub fn step(&mut self, hp: &AdamParams, t: usize) {
        self.weights.step(hp, t);
        self.biases.step(hp, t);
    }
}

#[derive(Debug, Clone)]
enum DropoutMask {
    Vector(Array1<f64>),
    Sequence(Array2<f64>),
}

/// Inverted dropout: active only while training, identity at evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    pub rate: f64,
    #[serde(skip)]
    mask: Option<DropoutMask>,
}

impl Dropout {
    pub fn new(rate: f64) -> Self {
        Self { rate, mask: None }
    }

    pub fn forward_vector(&mut self, input: &Array1<f64>, rng: Option<&mut StdRng>) -> Array1<f64> {
        match rng {
            Some(rng) => {
                let keep = 1.0 - self.rate;
                let mask = Array1::from_shape_fn(input.len(), |_| {
                    if rng.gen::<f64>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                });
                let out = input * &mask;
                self.mask = Some(DropoutMask::Vector(mask));
                out
            }
            None => {
                self.mask = None;
                input.clone()
            }
        }
    }

    pub fn forward_sequence(&mut self, input: &Array2<f64>, rng: Option<&mut StdRng>) -> Array2<f64> {
        match rng {
            Some(rng) => {
                let keep = 1.0 - self.rate;
                let mask = Array2::from_shape_fn(input.raw_dim(), |_| {
                    if rng.gen::<f64>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                });
                let out = input * &mask;
                self.mask = Some(DropoutMask::Sequence(mask));
                out
            }
            None => {
                self.mask = None;
                input.clone()
            }
        }
    }

    pub fn backward_vector(&mut self, d_out: &Array1<f64>) -> Result<Array1<f64>> {
        match self.mask.take() {
            Some(DropoutMask::Vector(mask)) => Ok(d_out * &mask),
            Some(DropoutMask::Sequence(_)) => bail!("dropout saw a sequence on the forward pass"),
            None => Ok(d_out.clone()),
        }
    }

    pub fn backward_sequence(&mut self, d_out: &Array2<f64>) -> Result<Array2<f64>> {
        match self.mask.take() {
            Some(DropoutMask::Sequence(mask)) => Ok(d_out * &mask),
            Some(DropoutMask::Vector(_)) => bail!("dropout saw a vector on the forward pass"),
            None => Ok(d_out.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_dense_forward_known_values() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut layer = Dense::new(2, 2, Activation::Relu, &mut rng);
        layer.weights.value = array![[1.0, -1.0], [0.5, 0.5]];
        layer.biases.value = array![0.0, -10.0];

        let out = layer.forward(&array![3.0, 1.0]);
        assert_eq!(out, array![2.0, 0.0]); // second unit clipped by relu
    }

    #[test]
    fn test_dense_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut layer = Dense::new(3, 2, Activation::Linear, &mut rng);
        let input = array![0.5, -1.2, 2.0];

        // Loss = sum of outputs, so d_out is all ones.
        let loss = |layer: &mut Dense| layer.forward(&input).sum();

        let base = loss(&mut layer);
        assert!(base.is_finite());
        layer.zero_grads();
        layer.forward(&input);
        layer.backward(&array![1.0, 1.0]).unwrap();

        let eps = 1e-6;
        for i in 0..2 {
            for j in 0..3 {
                let original = layer.weights.value[[i, j]];
                layer.weights.value[[i, j]] = original + eps;
                let plus = loss(&mut layer);
                layer.weights.value[[i, j]] = original - eps;
                let minus = loss(&mut layer);
                layer.weights.value[[i, j]] = original;

                let numeric = (plus - minus) / (2.0 * eps);
                let analytic = layer.weights.grad[[i, j]];
                assert!(
                    (numeric - analytic).abs() < 1e-6,
                    "weight ({}, {}): numeric {} vs analytic {}",
                    i,
                    j,
                    numeric,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_dropout_is_identity_at_evaluation() {
        let mut layer = Dropout::new(0.5);
        let input = array![1.0, 2.0, 3.0];
        let out = layer.forward_vector(&input, None);
        assert_eq!(out, input);
    }

    #[test]
    fn test_dropout_zeroes_or_rescales_in_training() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = Dropout::new(0.5);
        let input = Array1::ones(1000);
        let out = layer.forward_vector(&input, Some(&mut rng));

        for v in out.iter() {
            assert!(*v == 0.0 || (*v - 2.0).abs() < 1e-12);
        }
        // Inverted scaling keeps the expected activation roughly unchanged.
        let mean = out.mean().unwrap();
        assert!((mean - 1.0).abs() < 0.15);
    }

    #[test]
    fn test_dropout_backward_reuses_forward_mask() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut layer = Dropout::new(0.4);
        let input = Array1::ones(64);
        let out = layer.forward_vector(&input, Some(&mut rng));
        let grad = layer.backward_vector(&Array1::ones(64)).unwrap();

        // Exactly the units kept forward receive gradient.
        for (o, g) in out.iter().zip(grad.iter()) {
            assert_eq!(*o == 0.0, *g == 0.0);
        }
    }

    #[test]
    fn test_adam_step_moves_against_gradient() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut param = Param2::uniform(2, 2, 0.5, &mut rng);
        let before = param.value.clone();
        param.grad.fill(1.0);
        param.step(&AdamParams::default(), 1);

        // With positive gradients every entry must decrease.
        for (b, a) in before.iter().zip(param.value.iter()) {
            assert!(a < b);
        }
    }
}
