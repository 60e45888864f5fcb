use serde::{Deserialize, Serialize};

use crate::model::network::{Activation, LayerSpec};

/// Every tunable of the pipeline, with defaults matching the reference run.
///
/// There are no CLI flags or environment variables; callers construct this
/// struct (usually via `Default`) and hand it to `pipeline::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Path to the input CSV. The first column must hold parseable timestamps.
    pub csv_path: String,
    /// Name of the target column to forecast.
    pub target_column: String,
    /// Window length: consecutive observations fed to the network per sample.
    pub n_steps: usize,
    /// Chronological train fraction. The remainder becomes the test set.
    pub train_ratio: f64,
    /// Fraction of the training partition (its tail, in order) held out for
    /// validation-loss reporting during training.
    pub validation_split: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Hidden width of both recurrent layers.
    pub lstm_units: usize,
    /// Width of the first fully connected layer.
    pub dense_units: usize,
    /// Dropout rate applied after each recurrent layer.
    pub dropout: f64,
    /// Seed for weight initialization and dropout masks.
    pub seed: u64,
    /// Print a progress line every this many epochs.
    pub log_every: usize,
    /// Where to write the actual-vs-predicted chart. `None` skips plotting.
    pub plot_path: Option<String>,
    /// Where to save the trained artifacts. `None` skips saving.
    pub model_path: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            csv_path: "air_quality.csv".to_string(),
            target_column: "pm25".to_string(),
            n_steps: 24,
            train_ratio: 0.8,
            validation_split: 0.1,
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.001,
            lstm_units: 50,
            dense_units: 32,
            dropout: 0.2,
            seed: 42,
            log_every: 5,
            plot_path: Some("pm25_forecast.png".to_string()),
            model_path: Some("pm25_model.bin".to_string()),
        }
    }
}

impl PipelineConfig {
    /// Checks every tunable against its valid range.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.n_steps == 0 {
            anyhow::bail!("n_steps must be at least 1");
        }
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            anyhow::bail!("train_ratio must be in (0, 1), got {}", self.train_ratio);
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            anyhow::bail!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            );
        }
        if self.epochs == 0 {
            anyhow::bail!("epochs must be at least 1");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.learning_rate <= 0.0 {
            anyhow::bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        if !(0.0..1.0).contains(&self.dropout) {
            anyhow::bail!("dropout must be in [0, 1), got {}", self.dropout);
        }
        if self.lstm_units == 0 || self.dense_units == 0 {
            anyhow::bail!("layer widths must be at least 1");
        }
        Ok(())
    }

    /// The network topology as an ordered list of layer specifications.
    pub fn layer_specs(&self) -> Vec<LayerSpec> {
        vec![
            LayerSpec::Lstm {
                units: self.lstm_units,
                return_sequences: true,
            },
            LayerSpec::Dropout { rate: self.dropout },
            LayerSpec::Lstm {
                units: self.lstm_units,
                return_sequences: false,
            },
            LayerSpec::Dropout { rate: self.dropout },
            LayerSpec::Dense {
                units: self.dense_units,
                activation: Activation::Relu,
            },
            LayerSpec::Dense {
                units: 1,
                activation: Activation::Linear,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.n_steps, 24);
        assert_eq!(config.epochs, 50);
        assert_eq!(config.batch_size, 32);
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let mut config = PipelineConfig::default();
        config.train_ratio = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.dropout = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.n_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_layer_specs_match_topology() {
        let config = PipelineConfig::default();
        let specs = config.layer_specs();
        assert_eq!(specs.len(), 6);
        assert!(matches!(
            specs[0],
            LayerSpec::Lstm {
                units: 50,
                return_sequences: true
            }
        ));
        assert!(matches!(specs[5], LayerSpec::Dense { units: 1, .. }));
    }
}
