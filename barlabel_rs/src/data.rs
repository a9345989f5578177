use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::error::SchemaError;

pub const COL_TIME: &str = "time";
pub const COL_OPEN: &str = "open";
pub const COL_HIGH: &str = "high";
pub const COL_LOW: &str = "low";
pub const COL_CLOSE: &str = "close";
pub const COL_VOLUME: &str = "volume";

pub const REQUIRED_COLUMNS: [&str; 6] = [
    COL_TIME, COL_OPEN, COL_HIGH, COL_LOW, COL_CLOSE, COL_VOLUME,
];

/// One row of the input series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Column-oriented OHLCV series, position-indexed and sorted by time.
/// Missing numeric cells are carried as NaN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    pub time: Vec<DateTime<Utc>>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl PriceSeries {
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut series = Self::default();
        for bar in bars {
            series.time.push(bar.time);
            series.open.push(bar.open);
            series.high.push(bar.high);
            series.low.push(bar.low);
            series.close.push(bar.close);
            series.volume.push(bar.volume);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// OHLCV columns in output order, paired with their canonical names.
    pub fn numeric_columns(&self) -> [(&'static str, &[f64]); 5] {
        [
            (COL_OPEN, &self.open),
            (COL_HIGH, &self.high),
            (COL_LOW, &self.low),
            (COL_CLOSE, &self.close),
            (COL_VOLUME, &self.volume),
        ]
    }

    /// Build the canonical table for this series.
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut columns = vec![time_series(&self.time)?];
        for (name, values) in self.numeric_columns() {
            columns.push(Series::new(name, values));
        }
        DataFrame::new(columns).context("Failed to assemble OHLCV frame")
    }
}

/// Loader output: the sorted input table (all columns, lower-cased) together
/// with the extracted OHLCV series aligned row-for-row with it.
#[derive(Clone)]
pub struct LoadedSeries {
    frame: DataFrame,
    prices: PriceSeries,
}

impl LoadedSeries {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn prices(&self) -> &PriceSeries {
        &self.prices
    }

    pub fn into_parts(self) -> (DataFrame, PriceSeries) {
        (self.frame, self.prices)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Columns of the input beyond the canonical OHLCV set.
    pub fn extra_column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .filter(|name| !REQUIRED_COLUMNS.contains(name))
            .map(str::to_string)
            .collect()
    }
}

/// Read a Parquet or CSV table from disk and normalize it.
pub fn load_table(path: &Path) -> Result<LoadedSeries> {
    let frame = read_frame(path)?;
    let loaded = normalize_frame(frame)
        .with_context(|| format!("Input table {} is not a valid OHLCV series", path.display()))?;
    info!(
        rows = loaded.len(),
        columns = loaded.frame.width(),
        path = %path.display(),
        "Loaded OHLCV series"
    );
    let extra = loaded.extra_column_names();
    if !extra.is_empty() {
        debug!(columns = ?extra, "Passing through extra input columns");
    }
    Ok(loaded)
}

pub fn read_frame(path: &Path) -> Result<DataFrame> {
    match table_format(path) {
        TableFormat::Parquet => {
            let file = File::open(path)
                .with_context(|| format!("Unable to open {}", path.display()))?;
            ParquetReader::new(file)
                .finish()
                .with_context(|| format!("Failed to read Parquet table {}", path.display()))
        }
        TableFormat::Csv => CsvReader::from_path(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .infer_schema(Some(1024))
            .has_header(true)
            .finish()
            .with_context(|| format!("Unable to read CSV {} into DataFrame", path.display())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Parquet,
    Csv,
}

/// Anything that is not explicitly `.csv` is treated as Parquet.
pub fn table_format(path: &Path) -> TableFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => TableFormat::Csv,
        _ => TableFormat::Parquet,
    }
}

/// Lower-case column names, check the OHLCV contract, and stably sort rows by
/// time. Rows sharing a timestamp keep their input order.
pub fn normalize_frame(mut frame: DataFrame) -> Result<LoadedSeries> {
    let lowered: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|name| name.to_lowercase())
        .collect();
    for (idx, name) in lowered.iter().enumerate() {
        if lowered[..idx].contains(name) {
            return Err(SchemaError::DuplicateColumn { name: name.clone() }.into());
        }
    }
    frame
        .set_column_names(&lowered)
        .context("Failed to lower-case column names")?;

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !lowered.iter().any(|name| name == *required))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns {
            required: REQUIRED_COLUMNS.iter().map(|s| s.to_string()).collect(),
            missing,
            found: lowered,
        }
        .into());
    }

    let time = timestamp_column(frame.column(COL_TIME)?)?;

    let mut order: Vec<usize> = (0..time.len()).collect();
    order.sort_by_key(|&idx| time[idx]);
    let already_sorted = order.iter().enumerate().all(|(pos, &idx)| pos == idx);
    if !already_sorted {
        debug!("Input rows are not time-ordered; sorting by time");
        let indices = IdxCa::from_vec(
            "sort_idx",
            order.iter().map(|&idx| idx as IdxSize).collect(),
        );
        frame = frame
            .take(&indices)
            .context("Failed to reorder rows by time")?;
    }
    let duplicates = order
        .windows(2)
        .filter(|pair| time[pair[0]] == time[pair[1]])
        .count();
    if duplicates > 0 {
        warn!(
            duplicates,
            "Input contains repeated timestamps; rows are kept in input order"
        );
    }

    let prices = PriceSeries {
        time: order.iter().map(|&idx| time[idx]).collect(),
        open: numeric_column(&frame, COL_OPEN)?,
        high: numeric_column(&frame, COL_HIGH)?,
        low: numeric_column(&frame, COL_LOW)?,
        close: numeric_column(&frame, COL_CLOSE)?,
        volume: numeric_column(&frame, COL_VOLUME)?,
    };

    frame
        .replace(COL_TIME, time_series(&prices.time)?)
        .context("Failed to store normalized time column")?;

    Ok(LoadedSeries { frame, prices })
}

/// Canonical `time` column: UTC datetimes at microsecond resolution.
pub fn time_series(time: &[DateTime<Utc>]) -> Result<Series> {
    let micros: Vec<i64> = time.iter().map(|ts| ts.timestamp_micros()).collect();
    Series::new(COL_TIME, micros)
        .cast(&DataType::Datetime(
            TimeUnit::Microseconds,
            Some("UTC".to_string()),
        ))
        .context("Failed to build UTC time column")
}

/// Read a numeric column as f64, with nulls mapped to NaN.
pub fn numeric_column(frame: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = frame
        .column(name)
        .with_context(|| format!("Missing required column {name}"))?;
    series_to_f64(series)
}

pub fn series_to_f64(series: &Series) -> Result<Vec<f64>> {
    if !series.dtype().is_numeric() {
        return Err(SchemaError::NonNumericColumn {
            column: series.name().to_string(),
            dtype: format!("{}", series.dtype()),
        }
        .into());
    }
    let cast = series
        .cast(&DataType::Float64)
        .with_context(|| format!("Failed to cast column {} to f64", series.name()))?;
    Ok(cast
        .f64()
        .with_context(|| format!("Column {} must be float", series.name()))?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect())
}

/// Interpret a time column as UTC instants. Datetime columns are taken at
/// their stored instant regardless of zone label; date columns map to
/// midnight UTC; strings accept RFC3339 or naive `YYYY-MM-DD[ HH:MM:SS[.f]]`.
pub fn timestamp_column(series: &Series) -> Result<Vec<DateTime<Utc>>> {
    match series.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let raw = series
                .cast(&DataType::Int64)
                .context("Failed to read datetime column as integers")?;
            let values = raw.i64().context("Datetime column must cast to i64")?;
            values
                .into_iter()
                .enumerate()
                .map(|(row, value)| {
                    value
                        .and_then(|v| datetime_from_unit(v, unit))
                        .ok_or_else(|| invalid_timestamp(row, value))
                })
                .collect()
        }
        DataType::Date => {
            let raw = series
                .cast(&DataType::Int32)
                .context("Failed to read date column as integers")?;
            let values = raw.i32().context("Date column must cast to i32")?;
            values
                .into_iter()
                .enumerate()
                .map(|(row, value)| {
                    value
                        .and_then(|days| {
                            DateTime::<Utc>::from_timestamp(i64::from(days) * 86_400, 0)
                        })
                        .ok_or_else(|| invalid_timestamp(row, value))
                })
                .collect()
        }
        DataType::String => {
            let values = series.str().context("Time column must be UTF-8 strings")?;
            let mut out = Vec::with_capacity(values.len());
            for (row, value) in values.into_iter().enumerate() {
                let raw = value.ok_or_else(|| invalid_timestamp(row, None::<i64>))?;
                let parsed = parse_timestamp(raw).ok_or_else(|| SchemaError::InvalidTimestamp {
                    row,
                    value: raw.to_string(),
                })?;
                out.push(parsed);
            }
            Ok(out)
        }
        other => Err(SchemaError::UnsupportedTimeType {
            dtype: format!("{other}"),
        }
        .into()),
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn datetime_from_unit(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Nanoseconds => Some(DateTime::<Utc>::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::<Utc>::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::<Utc>::from_timestamp_millis(value),
    }
}

fn invalid_timestamp<T: std::fmt::Debug>(row: usize, value: Option<T>) -> anyhow::Error {
    let value = match value {
        Some(v) => format!("{v:?}"),
        None => "null".to_string(),
    };
    SchemaError::InvalidTimestamp { row, value }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ts(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).expect("valid timestamp")
    }

    #[test]
    fn load_csv_lowercases_and_sorts_by_time() -> Result<()> {
        let temp_dir = tempdir()?;
        let csv_path = temp_dir.path().join("mixed_case.csv");
        std::fs::write(
            &csv_path,
            "Time,Open,HIGH,low,Close,Volume,Session\n\
             2024-01-01T02:00:00Z,3,3.5,2.5,3.2,30,b\n\
             2024-01-01T00:00:00Z,1,1.5,0.5,1.2,10,a\n\
             2024-01-01T01:00:00Z,2,2.5,1.5,2.2,20,a\n",
        )?;

        let loaded = load_table(&csv_path)?;
        assert_eq!(loaded.len(), 3);
        assert_eq!(
            loaded.frame().get_column_names(),
            vec!["time", "open", "high", "low", "close", "volume", "session"]
        );
        assert_eq!(loaded.prices().close, vec![1.2, 2.2, 3.2]);
        assert_eq!(loaded.prices().time[0], ts("2024-01-01T00:00:00Z"));
        assert_eq!(loaded.extra_column_names(), vec!["session".to_string()]);

        let volume = numeric_column(loaded.frame(), "volume")?;
        assert_eq!(volume, vec![10.0, 20.0, 30.0]);
        Ok(())
    }

    #[test]
    fn missing_required_column_is_schema_error() -> Result<()> {
        let temp_dir = tempdir()?;
        let csv_path = temp_dir.path().join("no_volume.csv");
        std::fs::write(
            &csv_path,
            "time,open,high,low,close\n2024-01-01T00:00:00Z,1,2,0.5,1.5\n",
        )?;

        let err = match load_table(&csv_path) {
            Ok(_) => panic!("expected schema error"),
            Err(err) => err,
        };
        match err.downcast_ref::<SchemaError>() {
            Some(SchemaError::MissingColumns { missing, .. }) => {
                assert_eq!(missing, &vec!["volume".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn duplicate_columns_after_lowercasing_are_rejected() {
        let frame = DataFrame::new(vec![
            Series::new("Close", [1.0]),
            Series::new("close", [2.0]),
        ])
        .expect("frame");
        let err = match normalize_frame(frame) {
            Ok(_) => panic!("expected duplicate column error"),
            Err(err) => err,
        };
        assert_eq!(
            err.downcast_ref::<SchemaError>(),
            Some(&SchemaError::DuplicateColumn {
                name: "close".to_string()
            })
        );
    }

    #[test]
    fn duplicate_timestamps_pass_through_in_input_order() -> Result<()> {
        let frame = df!(
            "time" => ["2024-01-01 01:00:00", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "2024-01-01 00:00:00"],
            "open" => [1.0, 2.0, 3.0, 4.0],
            "high" => [1.0, 2.0, 3.0, 4.0],
            "low" => [1.0, 2.0, 3.0, 4.0],
            "close" => [10.0, 20.0, 30.0, 40.0],
            "volume" => [1i64, 2, 3, 4],
        )?;

        let loaded = normalize_frame(frame)?;
        assert_eq!(loaded.len(), 4, "no deduplication of repeated timestamps");
        assert_eq!(loaded.prices().close, vec![20.0, 40.0, 10.0, 30.0]);
        assert_eq!(loaded.prices().time[0], loaded.prices().time[1]);
        Ok(())
    }

    #[test]
    fn non_numeric_price_column_is_schema_error() -> Result<()> {
        let frame = df!(
            "time" => ["2024-01-01"],
            "open" => ["1.0"],
            "high" => [1.0],
            "low" => [1.0],
            "close" => [1.0],
            "volume" => [1.0],
        )?;
        let err = match normalize_frame(frame) {
            Ok(_) => panic!("expected non-numeric error"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<SchemaError>(),
            Some(SchemaError::NonNumericColumn { column, .. }) if column == "open"
        ));
        Ok(())
    }

    #[test]
    fn unparsable_time_names_the_row() -> Result<()> {
        let frame = df!(
            "time" => ["2024-01-01", "not-a-time"],
            "open" => [1.0, 1.0],
            "high" => [1.0, 1.0],
            "low" => [1.0, 1.0],
            "close" => [1.0, 1.0],
            "volume" => [1.0, 1.0],
        )?;
        let err = match normalize_frame(frame) {
            Ok(_) => panic!("expected timestamp error"),
            Err(err) => err,
        };
        assert_eq!(
            err.downcast_ref::<SchemaError>(),
            Some(&SchemaError::InvalidTimestamp {
                row: 1,
                value: "not-a-time".to_string()
            })
        );
        Ok(())
    }

    #[test]
    fn string_time_spread_over_chunks_is_parsed() -> Result<()> {
        let mut frame = df!(
            "time" => ["2024-01-02 00:00:00", "2024-01-01 00:00:00"],
            "open" => [2.0, 1.0],
            "high" => [2.0, 1.0],
            "low" => [2.0, 1.0],
            "close" => [2.0, 1.0],
            "volume" => [2.0, 1.0],
        )?;
        let later = df!(
            "time" => ["2024-01-01 12:00:00"],
            "open" => [1.5],
            "high" => [1.5],
            "low" => [1.5],
            "close" => [1.5],
            "volume" => [1.5],
        )?;
        frame.vstack_mut(&later)?;
        assert_eq!(frame.column("time")?.n_chunks(), 2);

        let loaded = normalize_frame(frame)?;
        assert_eq!(loaded.prices().close, vec![1.0, 1.5, 2.0]);
        assert_eq!(loaded.prices().time[1], ts("2024-01-01T12:00:00Z"));
        Ok(())
    }

    #[test]
    fn null_prices_become_nan() -> Result<()> {
        let frame = df!(
            "time" => ["2024-01-01", "2024-01-02"],
            "open" => [Some(1.0), None],
            "high" => [1.0, 1.0],
            "low" => [1.0, 1.0],
            "close" => [1.0, 1.0],
            "volume" => [1.0, 1.0],
        )?;
        let loaded = normalize_frame(frame)?;
        assert!(loaded.prices().open[1].is_nan());
        Ok(())
    }

    #[test]
    fn parse_timestamp_accepts_common_layouts() {
        let expected = ts("2024-03-05T10:30:00Z");
        assert_eq!(parse_timestamp("2024-03-05 10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T12:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05 10:30"), Some(expected));
        assert!(parse_timestamp("2024-03-05").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn price_series_round_trips_to_frame() -> Result<()> {
        let bars = [
            Bar {
                time: ts("2024-01-01T00:00:00Z"),
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 100.0,
            },
            Bar {
                time: ts("2024-01-01T00:01:00Z"),
                open: 1.5,
                high: 2.5,
                low: 1.0,
                close: 2.0,
                volume: 120.0,
            },
        ];
        let series = PriceSeries::from_bars(&bars);
        assert_eq!(series.len(), 2);
        assert_eq!(series.close, vec![1.5, 2.0]);

        let loaded = normalize_frame(series.to_frame()?)?;
        assert_eq!(loaded.prices(), &series);
        Ok(())
    }
}
