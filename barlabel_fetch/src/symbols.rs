use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::FetchError;

/// Canonical upper-case code -> code expected by the Dukascopy feed.
static SYMBOLS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        "EURUSD", "GBPUSD", "USDJPY", "USDCHF", "USDCAD", "AUDUSD", "NZDUSD", "EURGBP", "EURJPY",
    ]
    .into_iter()
    .map(|code| (code, code))
    .collect()
});

/// Case-insensitive lookup of a supported FX pair.
pub fn resolve_symbol(symbol: &str) -> Result<&'static str, FetchError> {
    let upper = symbol.trim().to_ascii_uppercase();
    SYMBOLS
        .get(upper.as_str())
        .copied()
        .ok_or_else(|| FetchError::UnsupportedSymbol {
            symbol: symbol.to_string(),
            supported: supported_symbols().join(", "),
        })
}

pub fn supported_symbols() -> Vec<&'static str> {
    let mut codes: Vec<&'static str> = SYMBOLS.keys().copied().collect();
    codes.sort_unstable();
    codes
}
