use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("unsupported symbol '{symbol}' (supported: {supported})")]
    UnsupportedSymbol { symbol: String, supported: String },

    #[error("invalid granularity '{value}'; expected 'tick' or 'm1'")]
    InvalidGranularity { value: String },

    #[error("invalid resample frequency '{value}'; expected e.g. 30s, 1min, 15min, 1h or 1d")]
    InvalidFrequency { value: String },

    #[error("unknown timezone '{value}'")]
    InvalidTimezone { value: String },

    #[error("end date {end} is before start date {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("downloader exited with {status}: {stderr}")]
    DownloaderFailed { status: String, stderr: String },

    #[error("no raw records found under {}", dir.display())]
    NoData { dir: PathBuf },

    #[error("{stage} data is missing columns {missing:?}")]
    MissingColumns {
        stage: &'static str,
        missing: Vec<String>,
    },
}
