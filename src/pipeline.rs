use std::path::Path;

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDateTime;
use ndarray::{concatenate, s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::PipelineConfig;
use crate::data::features::calendar_features;
use crate::data::ingest::load_csv;
use crate::data::scaling::{StandardScaler, TargetScaler};
use crate::data::windowing::{create_sequences, train_test_split};
use crate::model::network::ForecastNet;
use crate::training::history::TrainingHistory;
use crate::training::trainer::Trainer;
use crate::utils::io::{save_model, TrainedForecaster};
use crate::utils::metrics::{mae, mse, rmse};
use crate::utils::plot::plot_forecast;

/// Everything the single training run produces, in original target units.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub mse: f64,
    pub mae: f64,
    pub rmse: f64,
    pub history: TrainingHistory,
    /// Test-set predictions, aligned with `actuals` and `timestamps`.
    pub predictions: Array1<f64>,
    pub actuals: Array1<f64>,
    pub timestamps: Vec<NaiveDateTime>,
    /// One-step-ahead forecast from the most recent window in the data.
    pub next_forecast: f64,
}

/// Runs the whole pipeline once: ingest, impute, featurize, scale, window,
/// split, train, evaluate, plot, forecast the next step, save.
pub fn run(config: &PipelineConfig) -> Result<PipelineReport> {
    config.validate()?;

    let table = load_csv(Path::new(&config.csv_path))?;
    println!("Loaded {} rows from {}", table.len(), config.csv_path);
    let table = table.forward_fill()?;

    // Raw readings plus cyclical calendar encodings, column-concatenated.
    let calendar = calendar_features(&table.timestamps);
    let features = concatenate(Axis(1), &[table.values.view(), calendar.view()])?;

    let feature_scaler = StandardScaler::fit(&features)?;
    let scaled_features = feature_scaler.transform(&features)?;

    let target = table.column(&config.target_column)?;
    let target_scaler = TargetScaler::fit(&target)?;
    let scaled_target = target_scaler.transform(&target);

    let (x, y) = create_sequences(&scaled_features, &scaled_target, config.n_steps)?;
    if x.shape()[0] == 0 {
        bail!(
            "{} rows yield no windows of length {}; need at least {} rows",
            table.len(),
            config.n_steps,
            config.n_steps + 1
        );
    }

    let (x_train, x_test, y_train, y_test) = train_test_split(&x, &y, config.train_ratio);
    let train_size = x_train.shape()[0];
    if train_size == 0 || x_test.shape()[0] == 0 {
        bail!(
            "split produced an empty partition ({} train / {} test samples)",
            train_size,
            x_test.shape()[0]
        );
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut net = ForecastNet::from_specs(scaled_features.ncols(), &config.layer_specs(), &mut rng)?;
    println!("{}", net.summary());

    let mut trainer = Trainer::new(
        config.epochs,
        config.batch_size,
        config.validation_split,
        config.learning_rate,
        config.seed,
        config.log_every,
    );
    let history = trainer.fit(&mut net, &x_train, &y_train)?;
    if let Some(train_loss) = history.final_train_loss() {
        match history.final_val_loss() {
            Some(val_loss) => println!(
                "Training finished - loss: {:.4} - val_loss: {:.4}",
                train_loss, val_loss
            ),
            None => println!("Training finished - loss: {:.4}", train_loss),
        }
    }

    // Evaluate on the held-out tail, reporting in original units.
    let predictions = target_scaler.inverse_transform(&net.predict_batch(&x_test)?);
    let actuals = target_scaler.inverse_transform(&y_test);

    let test_mse = mse(&actuals, &predictions);
    let test_mae = mae(&actuals, &predictions);
    let test_rmse = rmse(&actuals, &predictions);
    println!("MSE: {:.2}", test_mse);
    println!("MAE: {:.2}", test_mae);
    println!("RMSE: {:.2}", test_rmse);

    // Sample j of the test set targets row n_steps + train_size + j.
    let timestamps: Vec<NaiveDateTime> = (0..actuals.len())
        .map(|j| table.timestamps[config.n_steps + train_size + j])
        .collect();

    if let Some(plot_path) = &config.plot_path {
        plot_forecast(&timestamps, &actuals, &predictions, plot_path)
            .map_err(|e| anyhow!("failed to render {}: {}", plot_path, e))?;
        println!("Forecast plot written to {}", plot_path);
    }

    let last_window = scaled_features
        .slice(s![scaled_features.nrows() - config.n_steps.., ..])
        .to_owned();
    let next_forecast = predict_next(&mut net, &last_window, &target_scaler)?;
    println!("Next-hour PM2.5 forecast: {:.2}", next_forecast);

    if let Some(model_path) = &config.model_path {
        let forecaster = TrainedForecaster {
            config: config.clone(),
            net,
            feature_scaler,
            target_scaler,
        };
        save_model(&forecaster, model_path)?;
        println!("Model saved to {}", model_path);
    }

    Ok(PipelineReport {
        mse: test_mse,
        mae: test_mae,
        rmse: test_rmse,
        history,
        predictions,
        actuals,
        timestamps,
        next_forecast,
    })
}

/// Scores one already-scaled window and returns the forecast in original
/// target units.
pub fn predict_next(
    net: &mut ForecastNet,
    window: &Array2<f64>,
    target_scaler: &TargetScaler,
) -> Result<f64> {
    if window.ncols() != net.input_size {
        bail!(
            "window has {} features, network expects {}",
            window.ncols(),
            net.input_size
        );
    }
    let scaled = net.forward_sample(window, None)?;
    Ok(target_scaler.inverse_value(scaled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::network::{Activation, LayerSpec};
    use ndarray::Array;

    #[test]
    fn test_predict_next_rejects_wrong_width() {
        let mut rng = StdRng::seed_from_u64(9);
        let specs = vec![
            LayerSpec::Lstm {
                units: 4,
                return_sequences: false,
            },
            LayerSpec::Dense {
                units: 1,
                activation: Activation::Linear,
            },
        ];
        let mut net = ForecastNet::from_specs(3, &specs, &mut rng).unwrap();
        let scaler = TargetScaler { mean: 0.0, std: 1.0 };

        let wrong = Array2::zeros((5, 2));
        assert!(predict_next(&mut net, &wrong, &scaler).is_err());
    }

    #[test]
    fn test_predict_next_reports_original_units() {
        let mut rng = StdRng::seed_from_u64(10);
        let specs = vec![
            LayerSpec::Lstm {
                units: 4,
                return_sequences: false,
            },
            LayerSpec::Dense {
                units: 1,
                activation: Activation::Linear,
            },
        ];
        let mut net = ForecastNet::from_specs(2, &specs, &mut rng).unwrap();
        let window = Array::from_shape_fn((6, 2), |(t, f)| t as f64 * 0.1 + f as f64 * 0.3);

        let unit = TargetScaler { mean: 0.0, std: 1.0 };
        let shifted = TargetScaler { mean: 40.0, std: 12.5 };

        let raw = predict_next(&mut net, &window, &unit).unwrap();
        let scaled = predict_next(&mut net, &window, &shifted).unwrap();
        assert!((scaled - (raw * 12.5 + 40.0)).abs() < 1e-10);
    }
}
