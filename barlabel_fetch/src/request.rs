use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::error::FetchError;
use crate::symbols::resolve_symbol;

pub const DEFAULT_RAW_DIR: &str = "data/raw";
pub const DEFAULT_OUTPUT_DIR: &str = "data/dukascopy";
pub const DEFAULT_TZ: &str = "UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    Tick,
    #[default]
    M1,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Tick => "tick",
            Granularity::M1 => "m1",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tick" => Ok(Granularity::Tick),
            "m1" => Ok(Granularity::M1),
            _ => Err(FetchError::InvalidGranularity {
                value: value.to_string(),
            }),
        }
    }
}

/// Bar width for tick aggregation, written like `30s`, `1min`, `15min`,
/// `1h` or `1d`. Bins are aligned to multiples of the width since the epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResampleFrequency {
    label: String,
    micros: i64,
}

impl ResampleFrequency {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn micros(&self) -> i64 {
        self.micros
    }

    /// Start of the bin containing `micros` (UTC epoch microseconds).
    pub fn bin_start(&self, micros: i64) -> i64 {
        micros.div_euclid(self.micros) * self.micros
    }
}

impl fmt::Display for ResampleFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl FromStr for ResampleFrequency {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || FetchError::InvalidFrequency {
            value: value.to_string(),
        };
        let trimmed = value.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (count, unit) = trimmed.split_at(split);
        let count: i64 = if count.is_empty() {
            1
        } else {
            count.parse().map_err(|_| invalid())?
        };
        let unit_micros: i64 = match unit.to_ascii_lowercase().as_str() {
            "s" | "sec" => 1_000_000,
            "t" | "min" => 60 * 1_000_000,
            "h" | "hour" => 3_600 * 1_000_000,
            "d" | "day" => 86_400 * 1_000_000,
            _ => return Err(invalid()),
        };
        let micros = count.checked_mul(unit_micros).ok_or_else(invalid)?;
        if micros <= 0 {
            return Err(invalid());
        }
        Ok(Self {
            label: trimmed.to_string(),
            micros,
        })
    }
}

pub fn parse_timezone(value: &str) -> Result<Tz, FetchError> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|_| FetchError::InvalidTimezone {
            value: value.to_string(),
        })
}

/// Everything needed to download one symbol/date range and persist it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub granularity: Granularity,
    /// Only honoured for tick downloads.
    pub aggregate_to: Option<ResampleFrequency>,
    pub tz: String,
    /// Directory for the downloader's intermediate CSV files.
    pub raw_dir: PathBuf,
    /// Explicit output table; defaults to a name under `output_dir`.
    pub output: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl FetchRequest {
    pub fn new(symbol: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
            granularity: Granularity::default(),
            aggregate_to: None,
            tz: DEFAULT_TZ.to_string(),
            raw_dir: PathBuf::from(DEFAULT_RAW_DIR),
            output: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }

    /// Check symbol, timezone and date range before anything is downloaded.
    pub fn resolve(&self) -> Result<ResolvedRequest<'_>, FetchError> {
        let symbol = resolve_symbol(&self.symbol)?;
        let tz = parse_timezone(&self.tz)?;
        if self.end < self.start {
            return Err(FetchError::InvalidDateRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(ResolvedRequest {
            request: self,
            symbol,
            tz,
        })
    }
}

/// A [`FetchRequest`] whose symbol and timezone have been validated.
#[derive(Debug, Clone)]
pub struct ResolvedRequest<'a> {
    pub request: &'a FetchRequest,
    pub symbol: &'static str,
    pub tz: Tz,
}

impl ResolvedRequest<'_> {
    pub fn download_dir(&self) -> PathBuf {
        self.request
            .raw_dir
            .join(self.symbol)
            .join(self.request.granularity.as_str())
    }

    /// Aggregation applied to the raw records, if any.
    pub fn aggregation(&self) -> Option<&ResampleFrequency> {
        match self.request.granularity {
            Granularity::Tick => self.request.aggregate_to.as_ref(),
            Granularity::M1 => None,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        if let Some(path) = &self.request.output {
            return path.clone();
        }
        let freq = self
            .aggregation()
            .map(|freq| freq.label().to_string())
            .unwrap_or_else(|| self.request.granularity.to_string());
        default_output_path(
            &self.request.output_dir,
            self.symbol,
            &freq,
            self.request.start,
            self.request.end,
        )
    }
}

pub fn default_output_path(
    output_dir: &Path,
    symbol: &str,
    freq: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> PathBuf {
    output_dir.join(format!(
        "{symbol}_{freq}_{}_{}.parquet",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn granularity_parses_case_insensitively() {
        assert_eq!("TICK".parse::<Granularity>(), Ok(Granularity::Tick));
        assert_eq!("m1".parse::<Granularity>(), Ok(Granularity::M1));
        assert_eq!(
            "h1".parse::<Granularity>(),
            Err(FetchError::InvalidGranularity {
                value: "h1".to_string()
            })
        );
    }

    #[test]
    fn frequencies_map_to_fixed_widths() -> Result<(), FetchError> {
        assert_eq!("30s".parse::<ResampleFrequency>()?.micros(), 30_000_000);
        assert_eq!("1min".parse::<ResampleFrequency>()?.micros(), 60_000_000);
        assert_eq!("15min".parse::<ResampleFrequency>()?.micros(), 900_000_000);
        assert_eq!("1h".parse::<ResampleFrequency>()?.micros(), 3_600_000_000);
        assert_eq!("H".parse::<ResampleFrequency>()?.micros(), 3_600_000_000);
        assert_eq!("1D".parse::<ResampleFrequency>()?.micros(), 86_400_000_000);
        assert_eq!("5T".parse::<ResampleFrequency>()?.label(), "5T");
        for bad in ["", "15", "0min", "10 parsecs", "-5min"] {
            assert!(bad.parse::<ResampleFrequency>().is_err(), "{bad}");
        }
        Ok(())
    }

    #[test]
    fn bins_align_to_epoch_multiples() -> Result<(), FetchError> {
        let freq: ResampleFrequency = "15min".parse()?;
        let width = freq.micros();
        assert_eq!(freq.bin_start(0), 0);
        assert_eq!(freq.bin_start(width - 1), 0);
        assert_eq!(freq.bin_start(width), width);
        assert_eq!(freq.bin_start(-1), -width);
        Ok(())
    }

    #[test]
    fn resolve_validates_symbol_timezone_and_dates() {
        let mut request = FetchRequest::new("eurusd", date("2024-01-01"), date("2024-01-03"));
        let resolved = request.resolve().expect("valid request");
        assert_eq!(resolved.symbol, "EURUSD");
        assert_eq!(resolved.tz, chrono_tz::UTC);
        assert_eq!(
            resolved.download_dir(),
            PathBuf::from("data/raw/EURUSD/m1")
        );
        assert_eq!(
            resolved.output_path(),
            PathBuf::from("data/dukascopy/EURUSD_m1_2024-01-01_2024-01-03.parquet")
        );

        request.tz = "Mars/Olympus".to_string();
        assert!(matches!(
            request.resolve(),
            Err(FetchError::InvalidTimezone { .. })
        ));

        request.tz = "Europe/London".to_string();
        request.end = date("2023-12-31");
        assert!(matches!(
            request.resolve(),
            Err(FetchError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn output_name_uses_aggregation_only_for_ticks() -> Result<(), FetchError> {
        let mut request = FetchRequest::new("GBPUSD", date("2024-05-01"), date("2024-05-02"));
        request.aggregate_to = Some("1h".parse()?);
        request.output_dir = PathBuf::from("out");
        assert_eq!(
            request.resolve()?.output_path(),
            PathBuf::from("out/GBPUSD_m1_2024-05-01_2024-05-02.parquet")
        );

        request.granularity = Granularity::Tick;
        assert_eq!(
            request.resolve()?.output_path(),
            PathBuf::from("out/GBPUSD_1h_2024-05-01_2024-05-02.parquet")
        );

        request.output = Some(PathBuf::from("custom/eur.parquet"));
        assert_eq!(
            request.resolve()?.output_path(),
            PathBuf::from("custom/eur.parquet")
        );
        Ok(())
    }
}
