pub mod io;
pub mod metrics;
pub mod plot;

pub use io::{load_model, save_model, TrainedForecaster};
