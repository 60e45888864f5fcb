//! Hourly PM2.5 forecasting from a timestamped air-quality CSV.
//!
//! One call to [`pipeline::run`] carries the data from raw CSV to a trained
//! recurrent network: forward-filled readings plus cyclical calendar
//! features, standardized and cut into sliding windows, a chronological
//! train/test split, mini-batch training with Adam, and test-set evaluation
//! with an actual-vs-predicted chart.

pub mod config;
pub mod data;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

pub use config::PipelineConfig;
pub use pipeline::{predict_next, run, PipelineReport};
