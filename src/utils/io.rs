use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::data::scaling::{StandardScaler, TargetScaler};
use crate::model::network::ForecastNet;

/// Everything needed to score new windows after training: the network
/// weights plus the scalers that were fit alongside them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedForecaster {
    pub config: PipelineConfig,
    pub net: ForecastNet,
    pub feature_scaler: StandardScaler,
    pub target_scaler: TargetScaler,
}

pub fn save_model<P: AsRef<Path>>(forecaster: &TrainedForecaster, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create model file {}", path.display()))?;
    bincode::serialize_into(BufWriter::new(file), forecaster)
        .with_context(|| format!("failed to serialize model to {}", path.display()))?;
    Ok(())
}

pub fn load_model<P: AsRef<Path>>(path: P) -> Result<TrainedForecaster> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open model file {}", path.display()))?;
    let forecaster = bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("failed to deserialize model from {}", path.display()))?;
    Ok(forecaster)
}
