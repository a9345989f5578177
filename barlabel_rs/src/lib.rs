pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod labeling;
pub mod mask;
pub mod pipeline;
pub mod storage;

pub use config::{Config, IndicatorParams, LabelAtrGuard, TargetParams};
pub use data::{Bar, LoadedSeries, PriceSeries, load_table};
pub use error::{ParameterError, SchemaError};
pub use indicators::IndicatorFrame;
pub use labeling::ForwardLabels;
pub use mask::{DropReason, ValidityMask, ValidityReport};
pub use pipeline::{AssembledDataset, BuildReport, assemble, build_dataset};
