//! Turn raw downloader CSVs into a time-sorted OHLCV table.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use barlabel_rs::data::{REQUIRED_COLUMNS, series_to_f64, timestamp_column};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use polars::prelude::*;
use tracing::debug;

use crate::error::FetchError;
use crate::request::ResampleFrequency;

const TICK_TIME_ALIAS: &str = "timestamp";
const TICK_PRICE: &str = "bid";
const TICK_BID_VOLUME: &str = "bid_volume";
const TICK_ASK_VOLUME: &str = "ask_volume";

/// Read and concatenate raw CSV files. Column names are trimmed and
/// lower-cased so headers like `Time, Bid` line up across files.
pub fn read_raw_files(files: &[PathBuf]) -> Result<DataFrame> {
    let mut combined: Option<DataFrame> = None;
    for path in files {
        let frame = read_raw_csv(path)?;
        match combined.as_mut() {
            Some(all) => {
                all.vstack_mut(&frame)
                    .with_context(|| format!("{} does not match earlier files", path.display()))?;
            }
            None => combined = Some(frame),
        }
    }
    Ok(combined.unwrap_or_default())
}

fn read_raw_csv(path: &Path) -> Result<DataFrame> {
    let mut frame = CsvReader::from_path(path)
        .with_context(|| format!("Failed to load {}", path.display()))?
        .infer_schema(Some(1024))
        .has_header(true)
        .finish()
        .with_context(|| format!("Unable to read CSV {} into DataFrame", path.display()))?;
    let names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|name| name.trim().to_lowercase())
        .collect();
    frame.set_column_names(&names)?;
    debug!(rows = frame.height(), path = %path.display(), "Read raw file");
    Ok(frame)
}

/// Tick data: `timestamp` is accepted as an alias for `time`.
pub fn normalize_ticks(mut frame: DataFrame) -> Result<DataFrame> {
    if frame.get_column_index("time").is_none()
        && frame.get_column_index(TICK_TIME_ALIAS).is_some()
    {
        frame.rename(TICK_TIME_ALIAS, "time")?;
    }
    require_columns(&frame, "tick", &["time"])?;
    sort_by_time(frame)
}

pub fn normalize_m1(frame: DataFrame) -> Result<DataFrame> {
    require_columns(&frame, "m1", &REQUIRED_COLUMNS)?;
    sort_by_time(frame)
}

fn require_columns(frame: &DataFrame, stage: &'static str, required: &[&str]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|name| frame.get_column_index(name).is_none())
        .map(|name| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FetchError::MissingColumns { stage, missing }.into())
    }
}

/// Stable sort by `time`, replacing it with a UTC datetime column.
fn sort_by_time(frame: DataFrame) -> Result<DataFrame> {
    let times = timestamp_column(frame.column("time")?)?;
    let mut order: Vec<usize> = (0..times.len()).collect();
    order.sort_by_key(|&idx| times[idx]);
    let indices = IdxCa::from_vec("sort_idx", order.iter().map(|&idx| idx as IdxSize).collect());
    let mut sorted = frame.take(&indices).context("Failed to reorder rows by time")?;
    let sorted_times: Vec<DateTime<Utc>> = order.iter().map(|&idx| times[idx]).collect();
    sorted.replace("time", zoned_time_series(&sorted_times, Tz::UTC)?)?;
    Ok(sorted)
}

/// Aggregate time-sorted ticks into OHLCV bars. Bins without ticks are not
/// emitted; NaN prices are skipped inside a bin.
pub fn resample_ticks(ticks: &DataFrame, freq: &ResampleFrequency) -> Result<DataFrame> {
    let times = timestamp_column(ticks.column("time")?)?;
    let price_name = price_column(ticks)?;
    let prices = series_to_f64(ticks.column(&price_name)?)?;
    let volumes = tick_volume(ticks)?;

    let mut bars = BarAccumulator::default();
    let mut current: Option<(i64, OpenBar)> = None;
    for ((time, price), volume) in times.iter().zip(prices).zip(volumes) {
        let bin = freq.bin_start(time.timestamp_micros());
        if let Some((start, bar)) = current.as_mut() {
            if *start == bin {
                bar.push(price, volume);
                continue;
            }
        }
        if let Some((start, bar)) = current.take() {
            bars.finish(start, bar);
        }
        let mut bar = OpenBar::default();
        bar.push(price, volume);
        current = Some((bin, bar));
    }
    if let Some((start, bar)) = current.take() {
        bars.finish(start, bar);
    }
    debug!(
        ticks = times.len(),
        bars = bars.time.len(),
        freq = %freq,
        price = %price_name,
        "Aggregated ticks"
    );
    bars.into_frame()
}

fn price_column(ticks: &DataFrame) -> Result<String> {
    if ticks.get_column_index(TICK_PRICE).is_some() {
        return Ok(TICK_PRICE.to_string());
    }
    ticks
        .get_column_names()
        .into_iter()
        .find(|name| *name != "time")
        .map(str::to_string)
        .ok_or_else(|| {
            FetchError::MissingColumns {
                stage: "tick",
                missing: vec![TICK_PRICE.to_string()],
            }
            .into()
        })
}

fn tick_volume(ticks: &DataFrame) -> Result<Vec<f64>> {
    let height = ticks.height();
    match (
        ticks.column(TICK_BID_VOLUME).ok(),
        ticks.column(TICK_ASK_VOLUME).ok(),
    ) {
        (Some(bid), Some(ask)) => {
            let bid = series_to_f64(bid)?;
            let ask = series_to_f64(ask)?;
            Ok(bid
                .into_iter()
                .zip(ask)
                .map(|(b, a)| zero_if_nan(b) + zero_if_nan(a))
                .collect())
        }
        _ => Ok(vec![0.0; height]),
    }
}

fn zero_if_nan(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value }
}

#[derive(Default)]
struct OpenBar {
    open: Option<f64>,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl OpenBar {
    fn push(&mut self, price: f64, volume: f64) {
        self.volume += volume;
        if price.is_nan() {
            return;
        }
        match self.open {
            None => {
                self.open = Some(price);
                self.high = price;
                self.low = price;
            }
            Some(_) => {
                self.high = self.high.max(price);
                self.low = self.low.min(price);
            }
        }
        self.close = price;
    }
}

#[derive(Default)]
struct BarAccumulator {
    time: Vec<i64>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
}

impl BarAccumulator {
    fn finish(&mut self, start_micros: i64, bar: OpenBar) {
        self.time.push(start_micros);
        match bar.open {
            Some(open) => {
                self.open.push(open);
                self.high.push(bar.high);
                self.low.push(bar.low);
                self.close.push(bar.close);
            }
            None => {
                self.open.push(f64::NAN);
                self.high.push(f64::NAN);
                self.low.push(f64::NAN);
                self.close.push(f64::NAN);
            }
        }
        self.volume.push(bar.volume);
    }

    fn into_frame(self) -> Result<DataFrame> {
        let time = Series::new("time", self.time).cast(&DataType::Datetime(
            TimeUnit::Microseconds,
            Some("UTC".to_string()),
        ))?;
        DataFrame::new(vec![
            time,
            Series::new("open", self.open),
            Series::new("high", self.high),
            Series::new("low", self.low),
            Series::new("close", self.close),
            Series::new("volume", self.volume),
        ])
        .context("Failed to assemble resampled bars")
    }
}

/// Datetime column of UTC instants labeled with `tz`.
pub fn zoned_time_series(times: &[DateTime<Utc>], tz: Tz) -> Result<Series> {
    let micros: Vec<i64> = times.iter().map(|ts| ts.timestamp_micros()).collect();
    Series::new("time", micros)
        .cast(&DataType::Datetime(
            TimeUnit::Microseconds,
            Some(tz.name().to_string()),
        ))
        .with_context(|| format!("Failed to label time column with timezone {tz}"))
}

/// Relabel the (already sorted) time column with the requested timezone.
pub fn apply_timezone(mut frame: DataFrame, tz: Tz) -> Result<DataFrame> {
    let times = timestamp_column(frame.column("time")?)?;
    frame.replace("time", zoned_time_series(&times, tz)?)?;
    Ok(frame)
}
