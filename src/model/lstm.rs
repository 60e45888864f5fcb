use anyhow::{bail, Result};
use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::layers::{AdamParams, Param1, Param2};

/// Per-timestep state cached by the forward pass for backpropagation
/// through time. Gate activations are stored post-nonlinearity in the
/// column order i, f, g, o.
#[derive(Debug, Clone)]
struct LstmCache {
    inputs: Array2<f64>,    // [T, input_size]
    gates: Array2<f64>,     // [T, 4 * hidden]
    cells: Array2<f64>,     // [T, hidden] c_t
    cell_tanh: Array2<f64>, // [T, hidden] tanh(c_t)
    hiddens: Array2<f64>,   // [T, hidden] h_t
}

/// A single LSTM layer processing one window at a time.
///
/// The four gates share stacked weight matrices: rows `[0, H)` drive the
/// input gate, `[H, 2H)` the forget gate, `[2H, 3H)` the cell candidate and
/// `[3H, 4H)` the output gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayer {
    pub input_size: usize,
    pub hidden_size: usize,
    /// When true the layer emits every hidden state; otherwise only the
    /// final one feeds the next layer.
    pub return_sequences: bool,
    pub(crate) w_x: Param2, // [4H, input_size]
    pub(crate) w_h: Param2, // [4H, hidden]
    pub(crate) b: Param1,   // [4H]
    #[serde(skip)]
    cache: Option<LstmCache>,
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

impl LstmLayer {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        return_sequences: bool,
        rng: &mut StdRng,
    ) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let mut b = Param1::zeros(4 * hidden_size);
        // Forget-gate bias starts at 1 so early training retains cell state.
        b.value
            .slice_mut(s![hidden_size..2 * hidden_size])
            .fill(1.0);

        Self {
            input_size,
            hidden_size,
            return_sequences,
            w_x: Param2::uniform(4 * hidden_size, input_size, limit, rng),
            w_h: Param2::uniform(4 * hidden_size, hidden_size, limit, rng),
            b,
            cache: None,
        }
    }

    pub fn param_count(&self) -> usize {
        self.w_x.param_count() + self.w_h.param_count() + self.b.param_count()
    }

    /// Sequence length seen by the most recent forward pass.
    pub(crate) fn cached_steps(&self) -> Option<usize> {
        self.cache.as_ref().map(|c| c.hiddens.nrows())
    }

    /// Runs the window through the layer and returns all hidden states
    /// `[T, hidden]`. Callers that want only the final state take the last
    /// row; the full sequence is cached either way for the backward pass.
    pub fn forward(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.input_size {
            bail!(
                "lstm expects {} input features, got {}",
                self.input_size,
                x.ncols()
            );
        }
        let steps = x.nrows();
        if steps == 0 {
            bail!("lstm received an empty window");
        }

        let h = self.hidden_size;
        let mut gates = Array2::zeros((steps, 4 * h));
        let mut cells = Array2::zeros((steps, h));
        let mut cell_tanh = Array2::zeros((steps, h));
        let mut hiddens = Array2::zeros((steps, h));

        let mut h_prev: Array1<f64> = Array1::zeros(h);
        let mut c_prev: Array1<f64> = Array1::zeros(h);

        for t in 0..steps {
            let x_t = x.row(t);
            let pre = self.w_x.value.dot(&x_t) + self.w_h.value.dot(&h_prev) + &self.b.value;

            let i_gate = pre.slice(s![0..h]).mapv(sigmoid);
            let f_gate = pre.slice(s![h..2 * h]).mapv(sigmoid);
            let g_cand = pre.slice(s![2 * h..3 * h]).mapv(f64::tanh);
            let o_gate = pre.slice(s![3 * h..4 * h]).mapv(sigmoid);

            let c_t = &f_gate * &c_prev + &i_gate * &g_cand;
            let ct_tanh = c_t.mapv(f64::tanh);
            let h_t = &o_gate * &ct_tanh;

            gates.slice_mut(s![t, 0..h]).assign(&i_gate);
            gates.slice_mut(s![t, h..2 * h]).assign(&f_gate);
            gates.slice_mut(s![t, 2 * h..3 * h]).assign(&g_cand);
            gates.slice_mut(s![t, 3 * h..4 * h]).assign(&o_gate);
            cells.row_mut(t).assign(&c_t);
            cell_tanh.row_mut(t).assign(&ct_tanh);
            hiddens.row_mut(t).assign(&h_t);

            h_prev = h_t;
            c_prev = c_t;
        }

        self.cache = Some(LstmCache {
            inputs: x.clone(),
            gates,
            cells,
            cell_tanh,
            hiddens: hiddens.clone(),
        });

        Ok(hiddens)
    }

    /// Backpropagation through time. `d_hiddens` is the loss gradient with
    /// respect to every hidden state `[T, hidden]` (zero rows where the
    /// output was unused). Accumulates parameter gradients and returns the
    /// gradient with respect to the input window `[T, input_size]`.
    pub fn backward(&mut self, d_hiddens: &Array2<f64>) -> Result<Array2<f64>> {
        let cache = match self.cache.take() {
            Some(cache) => cache,
            None => bail!("lstm backward called before forward"),
        };

        let h = self.hidden_size;
        let steps = cache.hiddens.nrows();
        if d_hiddens.nrows() != steps || d_hiddens.ncols() != h {
            bail!(
                "hidden gradient shape [{}, {}] does not match cached [{}, {}]",
                d_hiddens.nrows(),
                d_hiddens.ncols(),
                steps,
                h
            );
        }

        let mut d_inputs = Array2::zeros((steps, self.input_size));
        let mut dh_next: Array1<f64> = Array1::zeros(h);
        let mut dc_next: Array1<f64> = Array1::zeros(h);

        for t in (0..steps).rev() {
            let i_gate = cache.gates.slice(s![t, 0..h]).to_owned();
            let f_gate = cache.gates.slice(s![t, h..2 * h]).to_owned();
            let g_cand = cache.gates.slice(s![t, 2 * h..3 * h]).to_owned();
            let o_gate = cache.gates.slice(s![t, 3 * h..4 * h]).to_owned();
            let ct_tanh = cache.cell_tanh.row(t).to_owned();

            let c_prev = if t == 0 {
                Array1::zeros(h)
            } else {
                cache.cells.row(t - 1).to_owned()
            };
            let h_prev = if t == 0 {
                Array1::zeros(h)
            } else {
                cache.hiddens.row(t - 1).to_owned()
            };

            let dh = &d_hiddens.row(t).to_owned() + &dh_next;

            // h = o * tanh(c)
            let d_o = &dh * &ct_tanh;
            let dc = &dh * &o_gate * &ct_tanh.mapv(|v| 1.0 - v * v) + &dc_next;

            // c = f * c_prev + i * g
            let d_i = &dc * &g_cand;
            let d_f = &dc * &c_prev;
            let d_g = &dc * &i_gate;

            // Back through the gate nonlinearities to the pre-activations.
            let mut d_pre = Array1::zeros(4 * h);
            d_pre
                .slice_mut(s![0..h])
                .assign(&(&d_i * &i_gate * &i_gate.mapv(|v| 1.0 - v)));
            d_pre
                .slice_mut(s![h..2 * h])
                .assign(&(&d_f * &f_gate * &f_gate.mapv(|v| 1.0 - v)));
            d_pre
                .slice_mut(s![2 * h..3 * h])
                .assign(&(&d_g * &g_cand.mapv(|v| 1.0 - v * v)));
            d_pre
                .slice_mut(s![3 * h..4 * h])
                .assign(&(&d_o * &o_gate * &o_gate.mapv(|v| 1.0 - v)));

            let d_col = d_pre.view().insert_axis(Axis(1));
            let x_row = cache.inputs.row(t).insert_axis(Axis(0));
            let h_row = h_prev.view().insert_axis(Axis(0));
            self.w_x.grad += &d_col.dot(&x_row);
            self.w_h.grad += &d_col.dot(&h_row);
            self.b.grad += &d_pre;

            d_inputs
                .row_mut(t)
                .assign(&self.w_x.value.t().dot(&d_pre));
            dh_next = self.w_h.value.t().dot(&d_pre);
            dc_next = &dc * &f_gate;
        }

        Ok(d_inputs)
    }

    pub fn zero_grads(&mut self) {
        self.w_x.zero_grad();
        self.w_h.zero_grad();
        self.b.zero_grad();
    }

    pub fn step(&mut self, hp: &AdamParams, t: usize) {
        self.w_x.step(hp, t);
        self.w_h.step(hp, t);
        self.b.step(hp, t);
    }
}
