use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::FetchError;
use crate::request::Granularity;

/// Source of raw per-day CSV files for one symbol and date range.
pub trait RawDownloader {
    /// Populate `dir` with CSV files. Files may be nested below `dir`.
    fn download(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
        dir: &Path,
    ) -> Result<()>;
}

/// Shells out to the `duka` command line tool, or to `python3 -m duka.cli`
/// when `duka` is not on `PATH`.
#[derive(Debug, Clone)]
pub struct DukaDownloader {
    program: Option<PathBuf>,
    python: String,
}

impl Default for DukaDownloader {
    fn default() -> Self {
        Self {
            program: None,
            python: "python3".to_string(),
        }
    }
}

impl DukaDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit `duka` executable instead of searching `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    fn command(&self) -> Command {
        match self.program.clone().or_else(|| find_on_path("duka")) {
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.arg("download");
                cmd
            }
            None => {
                debug!(python = %self.python, "duka not found on PATH; using python module");
                let mut cmd = Command::new(&self.python);
                cmd.args(["-m", "duka.cli", "download"]);
                cmd
            }
        }
    }
}

impl RawDownloader for DukaDownloader {
    fn download(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
        dir: &Path,
    ) -> Result<()> {
        let args = duka_args(symbol, start, end, granularity, dir);
        let started = Instant::now();
        let output = self
            .command()
            .args(&args)
            .output()
            .with_context(|| "Failed to spawn duka (is it installed and on PATH?)")?;
        if !output.status.success() {
            return Err(FetchError::DownloaderFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        info!(
            symbol,
            %granularity,
            dir = %dir.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Raw download finished"
        );
        Ok(())
    }
}

pub fn duka_args(
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
    dir: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-s".to_string(),
        symbol.to_string(),
        "-f".to_string(),
        start.format("%Y-%m-%d").to_string(),
        "-t".to_string(),
        end.format("%Y-%m-%d").to_string(),
        "-g".to_string(),
        granularity.to_string(),
        "-d".to_string(),
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(dir.as_os_str().to_os_string());
    args
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Every `*.csv` file below `dir`, sorted by path.
pub fn collect_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current)
            .with_context(|| format!("Unable to list {}", current.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
