use anyhow::{bail, Result};
use ndarray::{s, Array1, Array2, Array3};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::layers::{AdamParams, Dense, Dropout};
use super::lstm::LstmLayer;

pub use super::layers::Activation;

/// Declarative description of one layer. An ordered list of these compiles
/// into a `ForecastNet`, so alternate topologies can be swapped in without
/// touching the pipeline stages around the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LayerSpec {
    Lstm { units: usize, return_sequences: bool },
    Dropout { rate: f64 },
    Dense { units: usize, activation: Activation },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Layer {
    Lstm(LstmLayer),
    Dropout(Dropout),
    Dense(Dense),
}

/// Data flowing between layers: either a full sequence of feature vectors
/// or a single vector once a recurrent layer has collapsed time away.
enum Signal {
    Sequence(Array2<f64>),
    Vector(Array1<f64>),
}

/// The forecasting network: a window of scaled features in, one scaled
/// scalar forecast out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastNet {
    pub input_size: usize,
    pub(crate) layers: Vec<Layer>,
    specs: Vec<LayerSpec>,
}

impl ForecastNet {
    /// Compiles layer specs into a network, validating that each layer can
    /// consume what the previous one produces and that the final output is
    /// a single scalar.
    pub fn from_specs(input_size: usize, specs: &[LayerSpec], rng: &mut StdRng) -> Result<Self> {
        if input_size == 0 {
            bail!("input_size must be at least 1");
        }
        if specs.is_empty() {
            bail!("network needs at least one layer");
        }

        let mut layers = Vec::with_capacity(specs.len());
        let mut width = input_size;
        let mut is_sequence = true;

        for (idx, spec) in specs.iter().enumerate() {
            match *spec {
                LayerSpec::Lstm {
                    units,
                    return_sequences,
                } => {
                    if !is_sequence {
                        bail!("layer {}: recurrent layer after time was collapsed", idx);
                    }
                    if units == 0 {
                        bail!("layer {}: lstm needs at least one unit", idx);
                    }
                    layers.push(Layer::Lstm(LstmLayer::new(
                        width,
                        units,
                        return_sequences,
                        rng,
                    )));
                    width = units;
                    is_sequence = return_sequences;
                }
                LayerSpec::Dropout { rate } => {
                    if !(0.0..1.0).contains(&rate) {
                        bail!("layer {}: dropout rate must be in [0, 1)", idx);
                    }
                    layers.push(Layer::Dropout(Dropout::new(rate)));
                }
                LayerSpec::Dense { units, activation } => {
                    if is_sequence {
                        bail!(
                            "layer {}: dense layer requires a vector input; \
                             end the recurrent stack with return_sequences = false",
                            idx
                        );
                    }
                    if units == 0 {
                        bail!("layer {}: dense needs at least one unit", idx);
                    }
                    layers.push(Layer::Dense(Dense::new(width, units, activation, rng)));
                    width = units;
                }
            }
        }

        if is_sequence || width != 1 {
            bail!("network must end in a single scalar output");
        }

        Ok(Self {
            input_size,
            layers,
            specs: specs.to_vec(),
        })
    }

    /// Forward pass over one window `[n_steps, input_size]`. Passing a rng
    /// enables dropout (training mode); `None` runs in evaluation mode.
    pub fn forward_sample(
        &mut self,
        window: &Array2<f64>,
        mut rng: Option<&mut StdRng>,
    ) -> Result<f64> {
        if window.ncols() != self.input_size {
            bail!(
                "expected windows with {} features, got {}",
                self.input_size,
                window.ncols()
            );
        }

        let mut signal = Signal::Sequence(window.clone());
        for layer in &mut self.layers {
            signal = match (layer, signal) {
                (Layer::Lstm(lstm), Signal::Sequence(seq)) => {
                    let hiddens = lstm.forward(&seq)?;
                    if lstm.return_sequences {
                        Signal::Sequence(hiddens)
                    } else {
                        Signal::Vector(hiddens.row(hiddens.nrows() - 1).to_owned())
                    }
                }
                (Layer::Dropout(dropout), Signal::Sequence(seq)) => {
                    Signal::Sequence(dropout.forward_sequence(&seq, rng.as_deref_mut()))
                }
                (Layer::Dropout(dropout), Signal::Vector(vec)) => {
                    Signal::Vector(dropout.forward_vector(&vec, rng.as_deref_mut()))
                }
                (Layer::Dense(dense), Signal::Vector(vec)) => Signal::Vector(dense.forward(&vec)),
                _ => bail!("layer/input arity mismatch; this network was not validated"),
            };
        }

        match signal {
            Signal::Vector(out) if out.len() == 1 => Ok(out[0]),
            _ => bail!("network did not produce a single scalar"),
        }
    }

    /// Backward pass for the most recent `forward_sample` call, seeding the
    /// chain with dL/d(prediction). Gradients accumulate across calls until
    /// `zero_grads`.
    pub fn backward_sample(&mut self, d_prediction: f64) -> Result<()> {
        let mut signal = Signal::Vector(Array1::from_elem(1, d_prediction));

        for layer in self.layers.iter_mut().rev() {
            signal = match (&mut *layer, signal) {
                (Layer::Dense(dense), Signal::Vector(d_out)) => {
                    Signal::Vector(dense.backward(&d_out)?)
                }
                (Layer::Dropout(dropout), Signal::Vector(d_out)) => {
                    Signal::Vector(dropout.backward_vector(&d_out)?)
                }
                (Layer::Dropout(dropout), Signal::Sequence(d_out)) => {
                    Signal::Sequence(dropout.backward_sequence(&d_out)?)
                }
                (Layer::Lstm(lstm), incoming) => {
                    let d_hiddens = match incoming {
                        Signal::Sequence(d_seq) => d_seq,
                        // Only the final hidden state fed forward, so only
                        // its row carries gradient.
                        Signal::Vector(d_vec) => {
                            let steps = match lstm.cached_steps() {
                                Some(steps) => steps,
                                None => bail!("lstm backward called before forward"),
                            };
                            let mut d_seq = Array2::zeros((steps, lstm.hidden_size));
                            d_seq.row_mut(steps - 1).assign(&d_vec);
                            d_seq
                        }
                    };
                    Signal::Sequence(lstm.backward(&d_hiddens)?)
                }
                _ => bail!("layer/gradient arity mismatch"),
            };
        }

        Ok(())
    }

    /// Evaluation-mode predictions for a batch of windows.
    pub fn predict_batch(&mut self, x: &Array3<f64>) -> Result<Array1<f64>> {
        let n = x.shape()[0];
        let mut out = Array1::zeros(n);
        for i in 0..n {
            let window = x.slice(s![i, .., ..]).to_owned();
            out[i] = self.forward_sample(&window, None)?;
        }
        Ok(out)
    }

    pub fn zero_grads(&mut self) {
        for layer in &mut self.layers {
            match layer {
                Layer::Lstm(lstm) => lstm.zero_grads(),
                Layer::Dense(dense) => dense.zero_grads(),
                Layer::Dropout(_) => {}
            }
        }
    }

    pub fn step(&mut self, hp: &AdamParams, t: usize) {
        for layer in &mut self.layers {
            match layer {
                Layer::Lstm(lstm) => lstm.step(hp, t),
                Layer::Dense(dense) => dense.step(hp, t),
                Layer::Dropout(_) => {}
            }
        }
    }

    pub fn param_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| match layer {
                Layer::Lstm(lstm) => lstm.param_count(),
                Layer::Dense(dense) => dense.param_count(),
                Layer::Dropout(_) => 0,
            })
            .sum()
    }

    /// A printable architecture summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("ForecastNet (input features: {})", self.input_size)];
        for (spec, layer) in self.specs.iter().zip(&self.layers) {
            let line = match (spec, layer) {
                (
                    LayerSpec::Lstm {
                        units,
                        return_sequences,
                    },
                    Layer::Lstm(lstm),
                ) => format!(
                    "  lstm(units={}, {})  params={}",
                    units,
                    if *return_sequences {
                        "sequences"
                    } else {
                        "last state"
                    },
                    lstm.param_count()
                ),
                (LayerSpec::Dropout { rate }, _) => format!("  dropout(rate={:.2})", rate),
                (LayerSpec::Dense { units, activation }, Layer::Dense(dense)) => format!(
                    "  dense(units={}, {:?})  params={}",
                    units,
                    activation,
                    dense.param_count()
                ),
                _ => String::new(),
            };
            lines.push(line);
        }
        lines.push(format!("  total params: {}", self.param_count()));
        lines.join("\n")
    }
}
