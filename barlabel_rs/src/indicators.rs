//! Streaming and windowed indicator transforms over OHLCV columns.
//!
//! Every function is total: it returns a column of the same length as its
//! input, with NaN marking positions where the indicator is undefined
//! (warm-up prefixes, undefined seeds, windows containing undefined input).
//! Missing-value policy belongs to the assembler.

use crate::config::{BOLLINGER_STD_MULT, IndicatorParams, RSI_EPSILON, VOLUME_EPSILON};
use crate::data::PriceSeries;

pub const COL_ATR: &str = "atr";
pub const COL_RSI: &str = "rsi";
pub const COL_MA_FAST: &str = "ma_fast";
pub const COL_MA_SLOW: &str = "ma_slow";
pub const COL_BB_UPPER: &str = "bb_upper";
pub const COL_BB_MIDDLE: &str = "bb_middle";
pub const COL_BB_LOWER: &str = "bb_lower";
pub const COL_VOL_REL: &str = "vol_rel";

pub const INDICATOR_COLUMNS: [&str; 8] = [
    COL_ATR,
    COL_RSI,
    COL_MA_FAST,
    COL_MA_SLOW,
    COL_BB_UPPER,
    COL_BB_MIDDLE,
    COL_BB_LOWER,
    COL_VOL_REL,
];

/// Wilder's recursive smoother: `s[t] = alpha * x[t] + (1 - alpha) * s[t-1]`
/// with `alpha = 1 / period`.
///
/// The recursion is seeded by the first finite input (no boxed-average
/// seed). Non-finite inputs before the seed produce undefined output; after
/// the seed they leave the state untouched and repeat it.
#[derive(Debug, Clone)]
pub struct WilderSmoother {
    alpha: f64,
    state: Option<f64>,
}

impl WilderSmoother {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: 1.0 / period.max(1) as f64,
            state: None,
        }
    }

    pub fn update(&mut self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.state.unwrap_or(f64::NAN);
        }
        let next = match self.state {
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
            None => value,
        };
        self.state = Some(next);
        next
    }
}

pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    let mut smoother = WilderSmoother::new(period);
    values.iter().map(|&value| smoother.update(value)).collect()
}

/// True range. Undefined at `t = 0` (no previous close) and wherever an
/// operand is undefined.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let len = high.len().min(low.len()).min(close.len());
    let mut tr = vec![f64::NAN; len];
    for i in 1..len {
        let prev_close = close[i - 1];
        let operands = [high[i], low[i], prev_close];
        if operands.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let high_low = high[i] - low[i];
        let high_close = (high[i] - prev_close).abs();
        let low_close = (low[i] - prev_close).abs();
        tr[i] = high_low.max(high_close).max(low_close);
    }
    tr
}

pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    wilder_smooth(&true_range(high, low, close), period)
}

pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let len = close.len();
    let mut gains = vec![f64::NAN; len];
    let mut losses = vec![f64::NAN; len];
    for i in 1..len {
        let change = close[i] - close[i - 1];
        if !change.is_finite() {
            continue;
        }
        gains[i] = change.max(0.0);
        losses[i] = (-change).max(0.0);
    }

    let avg_gain = wilder_smooth(&gains, period);
    let avg_loss = wilder_smooth(&losses, period);
    avg_gain
        .iter()
        .zip(avg_loss.iter())
        .map(|(gain, loss)| {
            let rs = gain / (loss + RSI_EPSILON);
            100.0 - 100.0 / (1.0 + rs)
        })
        .collect()
}

/// Trailing arithmetic mean over exactly `period` values. Undefined for the
/// first `period - 1` positions and for any window holding an undefined value.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let len = values.len();
    let mut result = vec![f64::NAN; len];
    if period == 0 || period > len {
        return result;
    }
    for i in period - 1..len {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| !v.is_finite()) {
            continue;
        }
        result[i] = window.iter().sum::<f64>() / period as f64;
    }
    result
}

/// Trailing sample standard deviation (`n - 1` denominator) with the same
/// full-window rule as [`sma`].
pub fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
    if period < 2 {
        return vec![f64::NAN; values.len()];
    }
    let mean = sma(values, period);
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let mean_val = mean[i];
            if !mean_val.is_finite() {
                return f64::NAN;
            }
            let slice = &values[i + 1 - period..=i];
            let variance_sum = slice.iter().map(|x| (x - mean_val).powi(2)).sum::<f64>();
            (variance_sum / (period - 1) as f64).sqrt()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger(close: &[f64], period: usize, std_mult: f64) -> BollingerBands {
    let middle = sma(close, period);
    let std = rolling_std(close, period);
    let upper = middle
        .iter()
        .zip(std.iter())
        .map(|(m, s)| m + std_mult * s)
        .collect();
    let lower = middle
        .iter()
        .zip(std.iter())
        .map(|(m, s)| m - std_mult * s)
        .collect();
    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// `volume / (SMA(volume, period) + eps)`; undefined wherever the SMA is.
pub fn relative_volume(volume: &[f64], period: usize) -> Vec<f64> {
    let average = sma(volume, period);
    volume
        .iter()
        .zip(average.iter())
        .map(|(v, ma)| v / (ma + VOLUME_EPSILON))
        .collect()
}

/// All indicator columns for one series, aligned positionally with it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorFrame {
    pub atr: Vec<f64>,
    pub rsi: Vec<f64>,
    pub ma_fast: Vec<f64>,
    pub ma_slow: Vec<f64>,
    pub bollinger: BollingerBands,
    pub vol_rel: Vec<f64>,
    warmups: [usize; 8],
}

impl IndicatorFrame {
    /// Indicators share no state, so the independent pairs run on the rayon
    /// pool and join before returning.
    pub fn compute(prices: &PriceSeries, params: &IndicatorParams) -> Self {
        let ((atr_values, rsi_values), ((ma_fast, ma_slow), (bands, vol_rel))) = rayon::join(
            || {
                rayon::join(
                    || atr(&prices.high, &prices.low, &prices.close, params.atr),
                    || rsi(&prices.close, params.rsi),
                )
            },
            || {
                rayon::join(
                    || {
                        (
                            sma(&prices.close, params.ma_fast),
                            sma(&prices.close, params.ma_slow),
                        )
                    },
                    || {
                        (
                            bollinger(&prices.close, params.bb_period, BOLLINGER_STD_MULT),
                            relative_volume(&prices.volume, params.vol_period),
                        )
                    },
                )
            },
        );

        let window = |period: usize| period.saturating_sub(1);
        Self {
            atr: atr_values,
            rsi: rsi_values,
            ma_fast,
            ma_slow,
            bollinger: bands,
            vol_rel,
            warmups: [
                1,
                1,
                window(params.ma_fast),
                window(params.ma_slow),
                window(params.bb_period),
                window(params.bb_period),
                window(params.bb_period),
                window(params.vol_period),
            ],
        }
    }

    /// `(name, values, warm-up rows)` in output column order.
    pub fn columns(&self) -> [(&'static str, &[f64], usize); 8] {
        let w = &self.warmups;
        [
            (COL_ATR, &self.atr, w[0]),
            (COL_RSI, &self.rsi, w[1]),
            (COL_MA_FAST, &self.ma_fast, w[2]),
            (COL_MA_SLOW, &self.ma_slow, w[3]),
            (COL_BB_UPPER, &self.bollinger.upper, w[4]),
            (COL_BB_MIDDLE, &self.bollinger.middle, w[5]),
            (COL_BB_LOWER, &self.bollinger.lower, w[6]),
            (COL_VOL_REL, &self.vol_rel, w[7]),
        ]
    }
}
