pub mod layers;
pub mod lstm;
pub mod network;

pub use layers::{Activation, AdamParams};
pub use network::{ForecastNet, LayerSpec};
