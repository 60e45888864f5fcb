use std::error::Error;

use chrono::NaiveDateTime;
use ndarray::Array1;
use plotters::coord::types::RangedDateTime;
use plotters::prelude::*;

/// Draws actual vs. predicted target values over the test-set timestamps.
pub fn plot_forecast(
    timestamps: &[NaiveDateTime],
    actual: &Array1<f64>,
    predicted: &Array1<f64>,
    path: &str,
) -> Result<(), Box<dyn Error>> {
    if timestamps.len() != actual.len() || actual.len() != predicted.len() {
        return Err(format!(
            "series lengths differ: {} timestamps, {} actual, {} predicted",
            timestamps.len(),
            actual.len(),
            predicted.len()
        )
        .into());
    }
    if timestamps.len() < 2 {
        return Err("need at least two points to plot".into());
    }

    let root = BitMapBackend::new(path, (1024, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let t_min = timestamps[0];
    let t_max = timestamps[timestamps.len() - 1];
    let y_min = actual
        .iter()
        .chain(predicted.iter())
        .cloned()
        .fold(f64::INFINITY, f64::min);
    let y_max = actual
        .iter()
        .chain(predicted.iter())
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    let pad = ((y_max - y_min) * 0.05).max(1.0);

    let mut chart = ChartBuilder::on(&root)
        .caption("PM2.5: actual vs predicted", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(
            RangedDateTime::from(t_min..t_max),
            (y_min - pad)..(y_max + pad),
        )?;

    chart
        .configure_mesh()
        .x_desc("Time")
        .y_desc("PM2.5 (µg/m³)")
        .x_labels(8)
        .x_label_formatter(&|ts| ts.format("%m-%d %H:%M").to_string())
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            timestamps.iter().zip(actual.iter()).map(|(&t, &v)| (t, v)),
            &RED,
        ))?
        .label("Actual")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

    chart
        .draw_series(LineSeries::new(
            timestamps
                .iter()
                .zip(predicted.iter())
                .map(|(&t, &v)| (t, v)),
            &BLUE,
        ))?
        .label("Predicted")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
