use std::path::PathBuf;

use anyhow::{Context, Result};
use barlabel_fetch::request::{DEFAULT_OUTPUT_DIR, DEFAULT_RAW_DIR, DEFAULT_TZ};
use barlabel_fetch::{FetchRequest, Granularity, ResampleFrequency};
use barlabel_rs::{Config, LabelAtrGuard};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "barlabel",
    version,
    about = "OHLCV feature engineering and ATR-normalized forward labels"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute indicators and forward labels for an OHLCV table
    #[command(name = "build")]
    Build(BuildArgs),
    /// Download Dukascopy data and store it as a table
    #[command(name = "fetch")]
    Fetch(FetchArgs),
}

impl Commands {
    pub fn log_file(&self) -> Option<&PathBuf> {
        match self {
            Commands::Build(args) => args.log_file.as_ref(),
            Commands::Fetch(args) => args.log_file.as_ref(),
        }
    }
}

#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Input OHLCV table (.parquet or .csv)
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub input: PathBuf,

    /// Output table; `.csv` writes CSV, anything else Parquet
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,

    /// TOML file with [indicators] and [targets] sections
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Override targets.horizon from the config
    #[arg(long)]
    pub horizon: Option<usize>,

    /// Override targets.atr_guard from the config
    #[arg(long = "atr-guard")]
    pub atr_guard: Option<AtrGuardValue>,

    /// Also append logs to this file
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl BuildArgs {
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(horizon) = self.horizon {
            config.targets.horizon = horizon;
        }
        if let Some(guard) = self.atr_guard {
            config.targets.atr_guard = guard.to_guard();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AtrGuardValue {
    Unguarded,
    #[value(name = "exclude-non-positive")]
    ExcludeNonPositive,
}

impl AtrGuardValue {
    fn to_guard(self) -> LabelAtrGuard {
        match self {
            AtrGuardValue::Unguarded => LabelAtrGuard::Unguarded,
            AtrGuardValue::ExcludeNonPositive => LabelAtrGuard::ExcludeNonPositive,
        }
    }
}

#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Currency pair, e.g. EURUSD
    #[arg(long)]
    pub symbol: String,

    /// First day to download (YYYY-MM-DD)
    #[arg(long)]
    pub start: NaiveDate,

    /// Last day to download (YYYY-MM-DD)
    #[arg(long)]
    pub end: NaiveDate,

    /// Raw data granularity: tick or m1
    #[arg(long, default_value = "m1")]
    pub granularity: String,

    /// Resample ticks into bars of this width (e.g. 30s, 1min, 15min, 1h)
    #[arg(long = "aggregate-to", value_name = "FREQ")]
    pub aggregate_to: Option<String>,

    /// Timezone label for the stored time column
    #[arg(long, default_value = DEFAULT_TZ)]
    pub tz: String,

    /// Output table path (defaults to a name under --output-dir)
    #[arg(long = "out", value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Directory for intermediate CSV downloads
    #[arg(long = "out-dir", default_value = DEFAULT_RAW_DIR, value_hint = clap::ValueHint::DirPath)]
    pub out_dir: PathBuf,

    /// Directory for the default output table
    #[arg(long = "output-dir", default_value = DEFAULT_OUTPUT_DIR, value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// Interpreter used for `python -m duka.cli` when duka is not on PATH
    #[arg(long, default_value = "python3")]
    pub python: String,

    /// Also append logs to this file
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl FetchArgs {
    pub fn into_request(self) -> Result<FetchRequest> {
        let aggregate_to = self
            .aggregate_to
            .as_deref()
            .map(str::parse::<ResampleFrequency>)
            .transpose()
            .context("Invalid --aggregate-to")?;
        let mut request = FetchRequest::new(self.symbol, self.start, self.end);
        request.granularity = self.granularity.parse::<Granularity>()?;
        request.aggregate_to = aggregate_to;
        request.tz = self.tz;
        request.raw_dir = self.out_dir;
        request.output = self.out;
        request.output_dir = self.output_dir;
        request.resolve()?;
        Ok(request)
    }
}
