use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

/// Multiplier applied to the rolling standard deviation for the Bollinger envelope.
pub const BOLLINGER_STD_MULT: f64 = 2.0;
/// Guards `avg_loss` in the RSI ratio against division by zero.
pub const RSI_EPSILON: f64 = 1e-12;
/// Guards the volume moving average in relative volume against division by zero.
pub const VOLUME_EPSILON: f64 = 1e-12;
/// Number of leading rows written to the preview artefact.
pub const PREVIEW_ROWS: usize = 200;

/// Recursive smoothers (ATR, RSI) are undefined only at the first row.
const RECURSIVE_WARMUP_ROWS: usize = 1;

/// Pipeline parameters. Constructed once (from TOML or defaults) and passed by
/// reference into every stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub indicators: IndicatorParams,
    #[serde(default)]
    pub targets: TargetParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorParams {
    /// Wilder ATR period.
    #[serde(default = "default_atr_period")]
    pub atr: usize,
    /// Wilder RSI period.
    #[serde(default = "default_rsi_period")]
    pub rsi: usize,
    #[serde(default = "default_ma_fast")]
    pub ma_fast: usize,
    #[serde(default = "default_ma_slow")]
    pub ma_slow: usize,
    /// Window for the Bollinger middle band and its sample standard deviation.
    #[serde(default = "default_bb_period")]
    pub bb_period: usize,
    /// Window of the volume moving average used by relative volume.
    #[serde(default = "default_vol_period")]
    pub vol_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            atr: default_atr_period(),
            rsi: default_rsi_period(),
            ma_fast: default_ma_fast(),
            ma_slow: default_ma_slow(),
            bb_period: default_bb_period(),
            vol_period: default_vol_period(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetParams {
    /// Number of future bars scanned for the forward excursions.
    #[serde(default = "default_horizon")]
    pub horizon: usize,
    #[serde(default)]
    pub atr_guard: LabelAtrGuard,
}

impl Default for TargetParams {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
            atr_guard: LabelAtrGuard::default(),
        }
    }
}

/// How the labeling engine treats rows whose ATR cannot normalize an excursion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LabelAtrGuard {
    /// Divide by ATR as-is; zero or undefined ATR yields non-finite labels that
    /// the assembler later drops.
    #[default]
    Unguarded,
    /// Mark both labels undefined when ATR is not finite or `<= 0`.
    ExcludeNonPositive,
}

fn default_atr_period() -> usize {
    14
}

fn default_rsi_period() -> usize {
    14
}

fn default_ma_fast() -> usize {
    10
}

fn default_ma_slow() -> usize {
    30
}

fn default_bb_period() -> usize {
    20
}

fn default_vol_period() -> usize {
    20
}

const fn default_horizon() -> usize {
    10
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).context("Failed to parse pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Unable to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        let periods = [
            ("indicators.atr", self.indicators.atr),
            ("indicators.rsi", self.indicators.rsi),
            ("indicators.ma_fast", self.indicators.ma_fast),
            ("indicators.ma_slow", self.indicators.ma_slow),
            ("indicators.bb_period", self.indicators.bb_period),
            ("indicators.vol_period", self.indicators.vol_period),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(ParameterError::NonPositivePeriod { name });
            }
        }
        if self.indicators.bb_period < 2 {
            return Err(ParameterError::BollingerPeriodTooShort {
                value: self.indicators.bb_period,
            });
        }
        if self.targets.horizon == 0 {
            return Err(ParameterError::NonPositiveHorizon);
        }
        Ok(())
    }

    /// Leading rows that carry at least one undefined indicator value on a
    /// gap-free input.
    pub fn warmup_rows(&self) -> usize {
        let ind = &self.indicators;
        [ind.ma_fast, ind.ma_slow, ind.bb_period, ind.vol_period]
            .into_iter()
            .map(|period| period.saturating_sub(1))
            .chain([RECURSIVE_WARMUP_ROWS, RECURSIVE_WARMUP_ROWS])
            .max()
            .unwrap_or(RECURSIVE_WARMUP_ROWS)
    }

    /// Rows expected in the final table for a gap-free input of `len` bars.
    pub fn expected_rows(&self, len: usize) -> usize {
        len.saturating_sub(self.warmup_rows() + self.targets.horizon)
    }
}
