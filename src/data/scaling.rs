use anyhow::{bail, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Per-column standardization: zero mean, unit variance, exact inverse.
///
/// Fit once on the full feature matrix before windowing; the same fitted
/// parameters are reused for every later transform. Constant columns keep a
/// standard deviation of 1.0 so the transform stays invertible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 {
            bail!("cannot fit a scaler on an empty matrix");
        }
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| anyhow::anyhow!("cannot fit a scaler on an empty matrix"))?;
        let std = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 { s } else { 1.0 });
        Ok(Self { mean, std })
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.mean.len() {
            bail!(
                "scaler fitted on {} columns, got {}",
                self.mean.len(),
                data.ncols()
            );
        }
        Ok((data - &self.mean) / &self.std)
    }

    pub fn inverse_transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.mean.len() {
            bail!(
                "scaler fitted on {} columns, got {}",
                self.mean.len(),
                data.ncols()
            );
        }
        Ok(data * &self.std + &self.mean)
    }
}

/// Standardization of the single target column, with scalar inverse for
/// reporting predictions in original units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetScaler {
    pub mean: f64,
    pub std: f64,
}

impl TargetScaler {
    pub fn fit(target: &Array1<f64>) -> Result<Self> {
        if target.is_empty() {
            bail!("cannot fit a scaler on an empty target column");
        }
        let mean = target.mean().unwrap_or(0.0);
        let std = target.std(0.0);
        let std = if std > 0.0 { std } else { 1.0 };
        Ok(Self { mean, std })
    }

    pub fn transform(&self, target: &Array1<f64>) -> Array1<f64> {
        target.mapv(|v| (v - self.mean) / self.std)
    }

    pub fn inverse_transform(&self, scaled: &Array1<f64>) -> Array1<f64> {
        scaled.mapv(|v| v * self.std + self.mean)
    }

    pub fn inverse_value(&self, scaled: f64) -> f64 {
        scaled * self.std + self.mean
    }
}
