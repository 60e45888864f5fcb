use anyhow::{bail, Result};
use ndarray::{s, Array1, Array2, Array3};

/// Builds sliding-window samples for one-step-ahead forecasting.
///
/// Sample `i` is the block of rows `[i, i + n_steps)` paired with the target
/// at row `i + n_steps`, so a table of length `L` yields exactly
/// `max(L - n_steps, 0)` samples, in strictly increasing start order.
pub fn create_sequences(
    data: &Array2<f64>,
    target: &Array1<f64>,
    n_steps: usize,
) -> Result<(Array3<f64>, Array1<f64>)> {
    if data.nrows() != target.len() {
        bail!(
            "feature matrix has {} rows but target has {}",
            data.nrows(),
            target.len()
        );
    }
    if n_steps == 0 {
        bail!("n_steps must be at least 1");
    }

    let n_rows = data.nrows();
    let n_features = data.ncols();
    let n_samples = n_rows.saturating_sub(n_steps);

    let mut x = Array3::zeros((n_samples, n_steps, n_features));
    let mut y = Array1::zeros(n_samples);

    for i in 0..n_samples {
        x.slice_mut(s![i, .., ..])
            .assign(&data.slice(s![i..i + n_steps, ..]));
        y[i] = target[i + n_steps];
    }

    Ok((x, y))
}

/// Chronological prefix/suffix split. No shuffling: the test partition is
/// always strictly after the training partition in time.
pub fn train_test_split(
    x: &Array3<f64>,
    y: &Array1<f64>,
    train_ratio: f64,
) -> (Array3<f64>, Array3<f64>, Array1<f64>, Array1<f64>) {
    let n_samples = x.shape()[0];
    let train_size = (n_samples as f64 * train_ratio) as usize;

    let x_train = x.slice(s![..train_size, .., ..]).to_owned();
    let x_test = x.slice(s![train_size.., .., ..]).to_owned();
    let y_train = y.slice(s![..train_size]).to_owned();
    let y_test = y.slice(s![train_size..]).to_owned();

    (x_train, x_test, y_train, y_test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp_table(n: usize, cols: usize) -> (Array2<f64>, Array1<f64>) {
        let data = Array::from_shape_fn((n, cols), |(r, c)| r as f64 + c as f64 * 1000.0);
        let target = Array::from_shape_fn(n, |r| r as f64);
        (data, target)
    }

    #[test]
    fn test_sample_count() {
        let (data, target) = ramp_table(100, 3);
        let (x, y) = create_sequences(&data, &target, 24).unwrap();
        assert_eq!(x.shape(), &[76, 24, 3]);
        assert_eq!(y.len(), 76);
    }

    #[test]
    fn test_short_input_yields_zero_samples() {
        let (data, target) = ramp_table(10, 2);
        let (x, y) = create_sequences(&data, &target, 24).unwrap();
        assert_eq!(x.shape()[0], 0);
        assert_eq!(y.len(), 0);

        let (data, target) = ramp_table(24, 2);
        let (x, _) = create_sequences(&data, &target, 24).unwrap();
        assert_eq!(x.shape()[0], 0);
    }

    #[test]
    fn test_targets_align_one_step_ahead() {
        let (data, target) = ramp_table(40, 2);
        let (x, y) = create_sequences(&data, &target, 5).unwrap();

        for i in 0..y.len() {
            // Window rows are contiguous and ordered...
            assert_eq!(x[[i, 0, 0]], i as f64);
            assert_eq!(x[[i, 4, 0]], (i + 4) as f64);
            // ...and the target is the row immediately after the window.
            assert_eq!(y[i], (i + 5) as f64);
        }
    }

    #[test]
    fn test_windows_step_without_gaps_or_duplicates() {
        let (data, target) = ramp_table(30, 1);
        let (x, _) = create_sequences(&data, &target, 3).unwrap();

        let starts: Vec<f64> = (0..x.shape()[0]).map(|i| x[[i, 0, 0]]).collect();
        for (i, start) in starts.iter().enumerate() {
            assert_eq!(*start, i as f64);
        }
    }

    #[test]
    fn test_split_preserves_temporal_order() {
        let (data, target) = ramp_table(100, 1);
        let (x, y) = create_sequences(&data, &target, 10).unwrap();
        let (x_train, x_test, y_train, y_test) = train_test_split(&x, &y, 0.8);

        assert_eq!(x_train.shape()[0], 72);
        assert_eq!(x_test.shape()[0], 18);
        assert_eq!(y_train.len() + y_test.len(), y.len());

        // Targets are a time ramp, so order is checkable directly.
        let max_train = y_train.iter().cloned().fold(f64::MIN, f64::max);
        let min_test = y_test.iter().cloned().fold(f64::MAX, f64::min);
        assert!(max_train < min_test);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let data = Array2::zeros((10, 2));
        let target = Array1::zeros(8);
        assert!(create_sequences(&data, &target, 3).is_err());
    }
}
