use std::f64::consts::PI;

use chrono::{Datelike, NaiveDateTime, Timelike};
use ndarray::Array2;

/// Names of the derived calendar columns, in emission order.
pub const CALENDAR_COLUMNS: [&str; 8] = [
    "hour_sin",
    "hour_cos",
    "day_of_week_sin",
    "day_of_week_cos",
    "day_of_year_sin",
    "day_of_year_cos",
    "month_sin",
    "month_cos",
];

const HOUR_PERIOD: f64 = 24.0;
const DAY_OF_WEEK_PERIOD: f64 = 7.0;
const DAY_OF_YEAR_PERIOD: f64 = 366.0;
const MONTH_PERIOD: f64 = 12.0;

/// Encodes a periodic integer quantity as a (sin, cos) pair so that values
/// adjacent across the period boundary stay adjacent in feature space.
fn cyclical(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}

/// Derives the cyclical calendar features for each timestamp.
///
/// Emits hour-of-day, day-of-week, day-of-year and month, each as a
/// (sin, cos) pair; the raw integer fields are never kept as columns.
pub fn calendar_features(timestamps: &[NaiveDateTime]) -> Array2<f64> {
    let mut features = Array2::zeros((timestamps.len(), CALENDAR_COLUMNS.len()));

    for (row, ts) in timestamps.iter().enumerate() {
        let (hour_sin, hour_cos) = cyclical(ts.hour() as f64, HOUR_PERIOD);
        let (dow_sin, dow_cos) = cyclical(
            ts.weekday().num_days_from_monday() as f64,
            DAY_OF_WEEK_PERIOD,
        );
        let (doy_sin, doy_cos) = cyclical(ts.ordinal() as f64, DAY_OF_YEAR_PERIOD);
        let (month_sin, month_cos) = cyclical(ts.month() as f64, MONTH_PERIOD);

        features[[row, 0]] = hour_sin;
        features[[row, 1]] = hour_cos;
        features[[row, 2]] = dow_sin;
        features[[row, 3]] = dow_cos;
        features[[row, 4]] = doy_sin;
        features[[row, 5]] = doy_cos;
        features[[row, 6]] = month_sin;
        features[[row, 7]] = month_cos;
    }

    features
}
