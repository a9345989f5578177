use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use polars::prelude::*;

/// Why a cell is undefined. A row is dropped when any of its cells carries
/// a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DropReason {
    /// Input cell (OHLCV or pass-through column) is null or NaN.
    MissingInput,
    /// Indicator cell inside its warm-up prefix.
    Warmup,
    /// Label cell without a full forward window.
    Censored,
    /// Label withheld because ATR was zero, negative or undefined.
    ZeroAtr,
    /// Any other NaN or infinity, e.g. an unguarded division by zero ATR.
    NonFinite,
}

impl DropReason {
    pub const ALL: [DropReason; 5] = [
        DropReason::MissingInput,
        DropReason::Warmup,
        DropReason::Censored,
        DropReason::ZeroAtr,
        DropReason::NonFinite,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::MissingInput => "missing_input",
            DropReason::Warmup => "warmup",
            DropReason::Censored => "censored",
            DropReason::ZeroAtr => "zero_atr",
            DropReason::NonFinite => "non_finite",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-row bitmap of drop reasons, plus per-column tallies of undefined cells.
#[derive(Debug, Clone, Default)]
pub struct ValidityMask {
    bits: Vec<u8>,
    cells_by_column: BTreeMap<String, usize>,
}

impl ValidityMask {
    pub fn new(rows: usize) -> Self {
        Self {
            bits: vec![0; rows],
            cells_by_column: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn mark(&mut self, row: usize, column: &str, reason: DropReason) {
        if let Some(bits) = self.bits.get_mut(row) {
            *bits |= reason.bit();
            *self.cells_by_column.entry(column.to_string()).or_insert(0) += 1;
        }
    }

    /// Mark every non-finite value of `values`, asking `classify` for the
    /// reason of each undefined row.
    pub fn record_values<F>(&mut self, column: &str, values: &[f64], classify: F)
    where
        F: Fn(usize) -> DropReason,
    {
        for (row, value) in values.iter().enumerate() {
            if !value.is_finite() {
                self.mark(row, column, classify(row));
            }
        }
    }

    /// Mark every undefined cell of a table column with `reason`.
    pub fn record_series(&mut self, series: &Series, reason: DropReason) -> Result<()> {
        let undefined = undefined_cells(series)?;
        let name = series.name().to_string();
        for (row, flag) in undefined.into_iter().enumerate() {
            if flag {
                self.mark(row, &name, reason);
            }
        }
        Ok(())
    }

    pub fn is_valid(&self, row: usize) -> bool {
        self.bits.get(row).is_some_and(|bits| *bits == 0)
    }

    pub fn has_reason(&self, row: usize, reason: DropReason) -> bool {
        self.bits
            .get(row)
            .is_some_and(|bits| bits & reason.bit() != 0)
    }

    pub fn keep_mask(&self) -> Vec<bool> {
        self.bits.iter().map(|bits| *bits == 0).collect()
    }

    pub fn report(&self) -> ValidityReport {
        let mut rows_by_reason = BTreeMap::new();
        for reason in DropReason::ALL {
            let count = self
                .bits
                .iter()
                .filter(|bits| **bits & reason.bit() != 0)
                .count();
            if count > 0 {
                rows_by_reason.insert(reason, count);
            }
        }
        let rows_kept = self.bits.iter().filter(|bits| **bits == 0).count();
        ValidityReport {
            rows_in: self.bits.len(),
            rows_kept,
            rows_dropped: self.bits.len() - rows_kept,
            rows_by_reason,
            cells_by_column: self.cells_by_column.clone(),
        }
    }
}

/// Summary of the cleanup step. A row dropped for several reasons counts once
/// under each of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidityReport {
    pub rows_in: usize,
    pub rows_kept: usize,
    pub rows_dropped: usize,
    pub rows_by_reason: BTreeMap<DropReason, usize>,
    pub cells_by_column: BTreeMap<String, usize>,
}

impl ValidityReport {
    pub fn rows_with(&self, reason: DropReason) -> usize {
        self.rows_by_reason.get(&reason).copied().unwrap_or(0)
    }
}

impl fmt::Display for ValidityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kept {} of {} rows ({} dropped)",
            self.rows_kept, self.rows_in, self.rows_dropped
        )?;
        if !self.rows_by_reason.is_empty() {
            let parts: Vec<String> = self
                .rows_by_reason
                .iter()
                .map(|(reason, count)| format!("{reason}={count}"))
                .collect();
            write!(f, "; {}", parts.join(", "))?;
        }
        Ok(())
    }
}

/// Null cells of any type, plus NaN and infinities in float columns.
pub fn undefined_cells(series: &Series) -> Result<Vec<bool>> {
    match series.dtype() {
        DataType::Float32 | DataType::Float64 => {
            let cast = series
                .cast(&DataType::Float64)
                .with_context(|| format!("Failed to cast column {} to f64", series.name()))?;
            let values = cast
                .f64()
                .with_context(|| format!("Column {} must be float", series.name()))?;
            Ok(values
                .into_iter()
                .map(|value| !value.is_some_and(f64::is_finite))
                .collect())
        }
        _ => {
            let nulls = series.is_null();
            Ok(nulls
                .into_iter()
                .map(|flag| flag.unwrap_or(true))
                .collect())
        }
    }
}
