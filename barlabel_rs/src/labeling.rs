//! Forward excursion labels normalized by ATR.
//!
//! For row `t` with a full forward window `t+1 ..= t+horizon`:
//!
//! ```text
//! up_atr[t]   = (max(high[t+1..=t+h]) - close[t]) / atr[t]
//! down_atr[t] = (close[t] - min(low[t+1..=t+h])) / atr[t]
//! ```
//!
//! The last `horizon` rows never have a full window and are always undefined.

use crate::config::LabelAtrGuard;

pub const COL_UP_ATR: &str = "up_atr";
pub const COL_DOWN_ATR: &str = "down_atr";

pub const LABEL_COLUMNS: [&str; 2] = [COL_UP_ATR, COL_DOWN_ATR];

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardLabels {
    pub up_atr: Vec<f64>,
    pub down_atr: Vec<f64>,
    /// First row without a full forward window (`len - horizon`, saturating).
    pub censored_from: usize,
    /// Rows whose labels were withheld by [`LabelAtrGuard::ExcludeNonPositive`].
    pub guarded_rows: Vec<usize>,
}

impl ForwardLabels {
    pub fn len(&self) -> usize {
        self.up_atr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.up_atr.is_empty()
    }

    pub fn is_censored(&self, row: usize) -> bool {
        row >= self.censored_from
    }

    pub fn columns(&self) -> [(&'static str, &[f64]); 2] {
        [(COL_UP_ATR, &self.up_atr), (COL_DOWN_ATR, &self.down_atr)]
    }
}

/// Maximum of `values[t+1 ..= t+horizon]` for each row with a full window.
/// Any undefined value inside the window makes the result undefined.
pub fn forward_max(values: &[f64], horizon: usize) -> Vec<f64> {
    forward_fold(values, horizon, f64::max)
}

/// Minimum of `values[t+1 ..= t+horizon]`, same rules as [`forward_max`].
pub fn forward_min(values: &[f64], horizon: usize) -> Vec<f64> {
    forward_fold(values, horizon, f64::min)
}

fn forward_fold(values: &[f64], horizon: usize, pick: fn(f64, f64) -> f64) -> Vec<f64> {
    let len = values.len();
    let mut out = vec![f64::NAN; len];
    if horizon == 0 {
        return out;
    }
    for t in 0..len.saturating_sub(horizon) {
        let window = &values[t + 1..=t + horizon];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        out[t] = window.iter().copied().fold(window[0], pick);
    }
    out
}

pub fn label_forward_excursions(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    atr: &[f64],
    horizon: usize,
    guard: LabelAtrGuard,
) -> ForwardLabels {
    let len = high.len().min(low.len()).min(close.len()).min(atr.len());
    let max_fwd = forward_max(&high[..len], horizon);
    let min_fwd = forward_min(&low[..len], horizon);
    let censored_from = len.saturating_sub(horizon);

    let mut up_atr = vec![f64::NAN; len];
    let mut down_atr = vec![f64::NAN; len];
    let mut guarded_rows = Vec::new();

    for t in 0..censored_from {
        let scale = atr[t];
        if guard == LabelAtrGuard::ExcludeNonPositive && !(scale.is_finite() && scale > 0.0) {
            guarded_rows.push(t);
            continue;
        }
        up_atr[t] = (max_fwd[t] - close[t]) / scale;
        down_atr[t] = (close[t] - min_fwd[t]) / scale;
    }

    ForwardLabels {
        up_atr,
        down_atr,
        censored_from,
        guarded_rows,
    }
}
