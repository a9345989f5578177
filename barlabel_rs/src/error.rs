use thiserror::Error;

/// Input table does not satisfy the OHLCV contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("input must contain columns {required:?}; missing {missing:?} (found {found:?})")]
    MissingColumns {
        required: Vec<String>,
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("column '{name}' appears more than once after lower-casing column names")]
    DuplicateColumn { name: String },

    #[error("column '{column}' must be numeric (got {dtype})")]
    NonNumericColumn { column: String, dtype: String },

    #[error("time column has unsupported type {dtype}; expected datetime, date or string")]
    UnsupportedTimeType { dtype: String },

    #[error("time value at row {row} could not be interpreted ({value})")]
    InvalidTimestamp { row: usize, value: String },
}

/// Invalid indicator or labeling parameters, detected before any data is read.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("indicator period '{name}' must be > 0")]
    NonPositivePeriod { name: &'static str },

    #[error("targets.horizon must be > 0")]
    NonPositiveHorizon,

    #[error("indicators.bb_period must be >= 2 to define a sample standard deviation (got {value})")]
    BollingerPeriodTooShort { value: usize },
}
