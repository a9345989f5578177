pub mod download;
pub mod error;
pub mod normalize;
pub mod request;
pub mod symbols;

use std::path::PathBuf;

use anyhow::{Context, Result};
use barlabel_rs::storage::write_table;
use tracing::{info, warn};

pub use download::{DukaDownloader, RawDownloader, collect_csv_files};
pub use error::FetchError;
pub use request::{FetchRequest, Granularity, ResampleFrequency};
pub use symbols::{resolve_symbol, supported_symbols};

use crate::normalize::{apply_timezone, normalize_m1, normalize_ticks, read_raw_files, resample_ticks};

/// Download raw records for `request`, normalize them to an OHLCV (or tick)
/// table and persist it. Returns the path of the written table.
pub fn fetch(request: &FetchRequest, downloader: &dyn RawDownloader) -> Result<PathBuf> {
    let resolved = request.resolve()?;
    if request.aggregate_to.is_some() && resolved.aggregation().is_none() {
        warn!(
            granularity = %request.granularity,
            "--aggregate-to only applies to tick downloads; ignoring it"
        );
    }

    let download_dir = resolved.download_dir();
    std::fs::create_dir_all(&download_dir)
        .with_context(|| format!("Unable to create {}", download_dir.display()))?;
    info!(
        symbol = resolved.symbol,
        start = %request.start,
        end = %request.end,
        granularity = %request.granularity,
        dir = %download_dir.display(),
        "Downloading raw records"
    );
    downloader.download(
        resolved.symbol,
        request.start,
        request.end,
        request.granularity,
        &download_dir,
    )?;

    let files = collect_csv_files(&download_dir)?;
    if files.is_empty() {
        return Err(FetchError::NoData { dir: download_dir }.into());
    }
    let raw = read_raw_files(&files)?;
    if raw.height() == 0 {
        return Err(FetchError::NoData { dir: download_dir }.into());
    }
    info!(files = files.len(), rows = raw.height(), "Read raw records");

    let table = match request.granularity {
        Granularity::Tick => {
            let ticks = normalize_ticks(raw)?;
            match resolved.aggregation() {
                Some(freq) => resample_ticks(&ticks, freq)?,
                None => ticks,
            }
        }
        Granularity::M1 => normalize_m1(raw)?,
    };
    let mut table = apply_timezone(table, resolved.tz)?;

    let output = resolved.output_path();
    write_table(&mut table, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(rows = table.height(), path = %output.display(), "Saved downloaded table");
    Ok(output)
}
