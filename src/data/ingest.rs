use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use csv::Reader;
use ndarray::{Array1, Array2};

/// Timestamp formats accepted in the first CSV column.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
];

/// An ordered, timestamp-indexed table of numeric readings.
///
/// Missing cells are held as NaN until `forward_fill` resolves them. Every
/// transformation returns a new table rather than mutating in place, so the
/// stage ordering is carried by the data flow instead of by convention.
#[derive(Debug, Clone)]
pub struct TimeSeriesTable {
    pub timestamps: Vec<NaiveDateTime>,
    pub columns: Vec<String>,
    /// Row-major readings, one row per timestamp, one column per series.
    pub values: Array2<f64>,
}

/// Reads a timestamped CSV into a table, sorting rows by ascending timestamp.
///
/// The first column is the timestamp; every other column is parsed as f64,
/// with empty cells and `NA`/`NaN` markers becoming NaN. A missing file is a
/// recognized failure with its own message; malformed rows propagate as
/// ordinary errors.
pub fn load_csv(path: &Path) -> Result<TimeSeriesTable> {
    if !path.exists() {
        bail!("input file not found: {}", path.display());
    }

    let file = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rdr = Reader::from_reader(file);

    let headers = rdr.headers().context("failed to read CSV header")?.clone();
    if headers.len() < 2 {
        bail!("expected a timestamp column and at least one value column");
    }
    let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut timestamps = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("failed to read row {}", line + 1))?;
        if record.len() != headers.len() {
            bail!(
                "row {} has {} fields, expected {}",
                line + 1,
                record.len(),
                headers.len()
            );
        }

        let ts = parse_timestamp(&record[0])
            .with_context(|| format!("row {}: bad timestamp {:?}", line + 1, &record[0]))?;

        let mut row = Vec::with_capacity(columns.len());
        for (field, name) in record.iter().skip(1).zip(&columns) {
            row.push(parse_cell(field).with_context(|| {
                format!("row {}: bad value {:?} in column {}", line + 1, field, name)
            })?);
        }

        timestamps.push(ts);
        rows.push(row);
    }

    if rows.is_empty() {
        bail!("{} contains no data rows", path.display());
    }

    // Rows must be in ascending timestamp order for windowing and splitting.
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by_key(|&i| timestamps[i]);

    let n_rows = rows.len();
    let n_cols = columns.len();
    let mut values = Array2::zeros((n_rows, n_cols));
    let mut sorted_ts = Vec::with_capacity(n_rows);
    for (out, &src) in order.iter().enumerate() {
        sorted_ts.push(timestamps[src]);
        for (c, &v) in rows[src].iter().enumerate() {
            values[[out, c]] = v;
        }
    }

    Ok(TimeSeriesTable {
        timestamps: sorted_ts,
        columns,
        values,
    })
}

fn parse_timestamp(field: &str) -> Result<NaiveDateTime> {
    let trimmed = field.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts);
        }
        // Date-only rows fall back to midnight.
        if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, format) {
            if let Some(ts) = date.and_hms_opt(0, 0, 0) {
                return Ok(ts);
            }
        }
    }
    bail!("unrecognized timestamp format")
}

fn parse_cell(field: &str) -> Result<f64> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan")
    {
        return Ok(f64::NAN);
    }
    Ok(trimmed.parse::<f64>()?)
}

impl TimeSeriesTable {
    /// Number of rows in the table.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// True if any cell is still NaN.
    pub fn has_missing(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    /// Returns one column by name.
    pub fn column(&self, name: &str) -> Result<Array1<f64>> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == name)
            .with_context(|| {
                format!(
                    "column {:?} not found; available columns: {}",
                    name,
                    self.columns.join(", ")
                )
            })?;
        Ok(self.values.column(idx).to_owned())
    }

    /// Imputes missing cells: each NaN takes the nearest preceding valid
    /// value in its column, and leading NaNs are back-filled from the first
    /// valid value. A column with no valid observation at all is an error.
    pub fn forward_fill(&self) -> Result<TimeSeriesTable> {
        let mut values = self.values.clone();

        for (c, name) in self.columns.iter().enumerate() {
            let mut col = values.column_mut(c);

            let mut last_valid = f64::NAN;
            for v in col.iter_mut() {
                if v.is_nan() {
                    *v = last_valid;
                } else {
                    last_valid = *v;
                }
            }

            // Leading gap: back-fill from the first valid observation.
            let first_valid = col.iter().copied().find(|v| !v.is_nan());
            match first_valid {
                Some(fill) => {
                    for v in col.iter_mut() {
                        if v.is_nan() {
                            *v = fill;
                        } else {
                            break;
                        }
                    }
                }
                None => bail!("column {:?} has no valid observations", name),
            }
        }

        Ok(TimeSeriesTable {
            timestamps: self.timestamps.clone(),
            columns: self.columns.clone(),
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_temp_csv(name: &str, contents: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("pm25_forecast_{}_{}", std::process::id(), name));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = load_csv(Path::new("definitely_not_here.csv")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_sorts_by_timestamp() {
        let path = write_temp_csv(
            "unsorted.csv",
            "date,pm25,temp\n\
             2014-01-01 02:00:00,30.0,5.0\n\
             2014-01-01 00:00:00,10.0,5.0\n\
             2014-01-01 01:00:00,20.0,5.0\n",
        );
        let table = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(table.len(), 3);
        assert!(table.timestamps.windows(2).all(|w| w[0] < w[1]));
        let pm25 = table.column("pm25").unwrap();
        assert_eq!(pm25.to_vec(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_forward_fill_is_noop_on_complete_data() {
        let path = write_temp_csv(
            "complete.csv",
            "date,pm25\n\
             2014-01-01 00:00:00,10.0\n\
             2014-01-01 01:00:00,20.0\n",
        );
        let table = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let filled = table.forward_fill().unwrap();
        assert_eq!(filled.values, table.values);
    }

    #[test]
    fn test_forward_fill_carries_last_value() {
        let path = write_temp_csv(
            "gaps.csv",
            "date,pm25\n\
             2014-01-01 00:00:00,10.0\n\
             2014-01-01 01:00:00,\n\
             2014-01-01 02:00:00,NA\n\
             2014-01-01 03:00:00,40.0\n",
        );
        let table = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(table.has_missing());
        let filled = table.forward_fill().unwrap();
        assert!(!filled.has_missing());
        let pm25 = filled.column("pm25").unwrap();
        assert_eq!(pm25.to_vec(), vec![10.0, 10.0, 10.0, 40.0]);
    }

    #[test]
    fn test_forward_fill_backfills_leading_gap() {
        let path = write_temp_csv(
            "leading.csv",
            "date,pm25\n\
             2014-01-01 00:00:00,\n\
             2014-01-01 01:00:00,25.0\n\
             2014-01-01 02:00:00,30.0\n",
        );
        let table = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let filled = table.forward_fill().unwrap();
        let pm25 = filled.column("pm25").unwrap();
        assert_eq!(pm25.to_vec(), vec![25.0, 25.0, 30.0]);
    }

    #[test]
    fn test_all_missing_column_is_an_error() {
        let path = write_temp_csv(
            "all_missing.csv",
            "date,pm25\n\
             2014-01-01 00:00:00,\n\
             2014-01-01 01:00:00,NA\n",
        );
        let table = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(table.forward_fill().is_err());
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let path = write_temp_csv(
            "cols.csv",
            "date,pm25\n2014-01-01 00:00:00,10.0\n",
        );
        let table = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(table.column("so2").is_err());
    }
}
