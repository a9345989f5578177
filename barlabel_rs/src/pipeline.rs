use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::{LoadedSeries, load_table};
use crate::indicators::{INDICATOR_COLUMNS, IndicatorFrame};
use crate::labeling::{LABEL_COLUMNS, label_forward_excursions};
use crate::mask::{DropReason, ValidityMask, ValidityReport};
use crate::storage::{config_fingerprint, fingerprint, write_dataset};

/// Cleaned feature/label table together with the reasons rows were removed.
#[derive(Debug, Clone)]
pub struct AssembledDataset {
    pub frame: DataFrame,
    pub validity: ValidityReport,
}

/// Outcome of [`build_dataset`].
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub output: PathBuf,
    pub preview: PathBuf,
    /// SHA-256 of the written table's CSV serialization.
    pub fingerprint: String,
    pub config_fingerprint: String,
    pub validity: ValidityReport,
}

/// Names of every column the pipeline appends, in output order.
pub fn computed_columns() -> Vec<&'static str> {
    INDICATOR_COLUMNS
        .iter()
        .chain(LABEL_COLUMNS.iter())
        .copied()
        .collect()
}

/// Compute indicators and labels for a loaded series and drop every row that
/// carries an undefined value in any column.
pub fn assemble(series: LoadedSeries, config: &Config) -> Result<AssembledDataset> {
    config.validate()?;
    let (mut frame, prices) = series.into_parts();

    for name in computed_columns() {
        if frame.get_column_index(name).is_some() {
            warn!(column = name, "Input column collides with a computed column; replacing it");
            frame = frame
                .drop(name)
                .with_context(|| format!("Failed to drop input column {name}"))?;
        }
    }

    let compute_start = Instant::now();
    let indicators = IndicatorFrame::compute(&prices, &config.indicators);
    let labels = label_forward_excursions(
        &prices.high,
        &prices.low,
        &prices.close,
        &indicators.atr,
        config.targets.horizon,
        config.targets.atr_guard,
    );
    debug!(
        elapsed_ms = compute_start.elapsed().as_millis() as u64,
        rows = prices.len(),
        "Computed indicator and label columns"
    );
    if !labels.guarded_rows.is_empty() {
        warn!(
            rows = labels.guarded_rows.len(),
            "Labels withheld for rows with non-positive ATR"
        );
    }

    let mut mask = ValidityMask::new(prices.len());
    for column in frame.get_columns() {
        mask.record_series(column, DropReason::MissingInput)?;
    }
    for (name, values, warmup) in indicators.columns() {
        mask.record_values(name, values, |row| {
            if row < warmup {
                DropReason::Warmup
            } else {
                DropReason::NonFinite
            }
        });
    }
    for (name, values) in labels.columns() {
        mask.record_values(name, values, |row| {
            if labels.is_censored(row) {
                DropReason::Censored
            } else if labels.guarded_rows.binary_search(&row).is_ok() {
                DropReason::ZeroAtr
            } else {
                DropReason::NonFinite
            }
        });
    }

    for (name, values, _) in indicators.columns() {
        frame
            .with_column(Series::new(name, values))
            .with_context(|| format!("Failed to append column {name}"))?;
    }
    for (name, values) in labels.columns() {
        frame
            .with_column(Series::new(name, values))
            .with_context(|| format!("Failed to append column {name}"))?;
    }

    let keep = BooleanChunked::from_slice("keep", &mask.keep_mask());
    let frame = frame
        .filter(&keep)
        .context("Failed to drop rows with undefined values")?;
    let validity = mask.report();

    info!(
        rows_in = validity.rows_in,
        rows_out = frame.height(),
        warmup = validity.rows_with(DropReason::Warmup),
        censored = validity.rows_with(DropReason::Censored),
        missing_input = validity.rows_with(DropReason::MissingInput),
        zero_atr = validity.rows_with(DropReason::ZeroAtr),
        non_finite = validity.rows_with(DropReason::NonFinite),
        "Dropped rows with undefined values"
    );
    if frame.height() == 0 {
        warn!("No rows survived cleanup; the series is shorter than warm-up plus horizon");
    }

    Ok(AssembledDataset { frame, validity })
}

/// Load `input`, assemble the dataset and persist it with its preview.
/// Nothing is written unless every stage succeeds.
pub fn build_dataset(input: &Path, output: &Path, config: &Config) -> Result<BuildReport> {
    config.validate()?;
    let started = Instant::now();
    let config_hash = config_fingerprint(config)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        config_hash = %config_hash,
        "Building feature/label dataset"
    );

    let series = load_table(input)?;
    let rows_in = series.len();
    let AssembledDataset {
        mut frame,
        validity,
    } = assemble(series, config)?;

    let digest = fingerprint(&frame)?;
    let preview = write_dataset(&mut frame, output)?;

    info!(
        rows = frame.height(),
        fingerprint = %digest,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Dataset ready"
    );

    Ok(BuildReport {
        rows_in,
        rows_out: frame.height(),
        output: output.to_path_buf(),
        preview,
        fingerprint: digest,
        config_fingerprint: config_hash,
        validity,
    })
}
