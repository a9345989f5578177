use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::Path;

use anyhow::Result;
use barlabel_rs::config::PREVIEW_ROWS;
use barlabel_rs::pipeline::computed_columns;
use barlabel_rs::{Config, DropReason, build_dataset};
use polars::prelude::*;
use tempfile::tempdir;

/// Deterministic 1-minute bars with a drifting sine-wave close.
fn write_bars_csv(path: &Path, rows: usize, extra: bool) -> Result<()> {
    let mut text = String::from("Time,Open,High,Low,Close,Volume");
    if extra {
        text.push_str(",Session");
    }
    text.push('\n');
    for i in 0..rows {
        let base = 1.10 + i as f64 * 0.0002 + (i as f64 * 0.3).sin() * 0.002;
        let hour = i / 60;
        let minute = i % 60;
        write!(
            text,
            "2024-02-{:02} {:02}:{:02}:00,{:.5},{:.5},{:.5},{:.5},{}",
            1 + hour / 24,
            hour % 24,
            minute,
            base,
            base + 0.0007,
            base - 0.0006,
            base + 0.0001,
            500 + (i * 37) % 400,
        )?;
        if extra {
            write!(text, ",{}", if i % 2 == 0 { "london" } else { "ny" })?;
        }
        text.push('\n');
    }
    fs::write(path, text)?;
    Ok(())
}

#[test]
fn three_hundred_bars_yield_261_clean_rows() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("bars.csv");
    let output = dir.path().join("out").join("features.parquet");
    write_bars_csv(&input, 300, false)?;

    let report = build_dataset(&input, &output, &Config::default())?;
    assert_eq!(report.rows_in, 300);
    assert_eq!(report.rows_out, 261);
    assert_eq!(report.validity.rows_with(DropReason::Warmup), 29);
    assert_eq!(report.validity.rows_with(DropReason::Censored), 10);
    assert_eq!(report.output, output);
    assert!(report.preview.ends_with("features.preview.csv"));

    let table = ParquetReader::new(File::open(&output)?).finish()?;
    assert_eq!(table.height(), 261);
    for name in ["time", "open", "high", "low", "close", "volume"] {
        assert!(table.column(name).is_ok(), "missing input column {name}");
    }
    for name in computed_columns() {
        let column = table.column(name)?;
        assert_eq!(column.null_count(), 0);
        assert!(
            column.f64()?.into_iter().all(|v| v.is_some_and(f64::is_finite)),
            "{name} has undefined values"
        );
    }
    assert!(matches!(
        table.column("time")?.dtype(),
        DataType::Datetime(_, _)
    ));
    Ok(())
}

#[test]
fn preview_holds_first_rows_of_the_table() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("bars.csv");
    let output = dir.path().join("features.csv");
    write_bars_csv(&input, 400, false)?;

    let report = build_dataset(&input, &output, &Config::default())?;
    assert_eq!(report.rows_out, 361);

    let preview = fs::read_to_string(&report.preview)?;
    let table = fs::read_to_string(&output)?;
    assert_eq!(preview.lines().count(), PREVIEW_ROWS + 1);
    let head: Vec<&str> = table.lines().take(PREVIEW_ROWS + 1).collect();
    let preview_lines: Vec<&str> = preview.lines().collect();
    assert_eq!(preview_lines, head);
    Ok(())
}

#[test]
fn rebuilding_is_byte_identical() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("bars.csv");
    write_bars_csv(&input, 250, false)?;

    let first_path = dir.path().join("first.csv");
    let second_path = dir.path().join("second.csv");
    let first = build_dataset(&input, &first_path, &Config::default())?;
    let second = build_dataset(&input, &second_path, &Config::default())?;

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.config_fingerprint, second.config_fingerprint);
    assert_eq!(fs::read(&first_path)?, fs::read(&second_path)?);
    Ok(())
}

#[test]
fn extra_columns_pass_through() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("bars.csv");
    let output = dir.path().join("features.parquet");
    write_bars_csv(&input, 120, true)?;

    let report = build_dataset(&input, &output, &Config::default())?;
    assert_eq!(report.rows_out, 120 - 39);
    let table = ParquetReader::new(File::open(&output)?).finish()?;
    let session = table.column("session")?;
    assert_eq!(session.len(), 81);
    assert_eq!(session.null_count(), 0);
    Ok(())
}

#[test]
fn parquet_input_matches_csv_input() -> Result<()> {
    let dir = tempdir()?;
    let csv_input = dir.path().join("bars.csv");
    write_bars_csv(&csv_input, 150, false)?;

    // Re-use the first build's output shape: load CSV, write it back as Parquet.
    let mut raw = CsvReader::from_path(&csv_input)?
        .infer_schema(Some(1024))
        .has_header(true)
        .finish()?;
    let parquet_input = dir.path().join("bars.parquet");
    ParquetWriter::new(&mut File::create(&parquet_input)?).finish(&mut raw)?;

    let from_csv = build_dataset(&csv_input, &dir.path().join("a.csv"), &Config::default())?;
    let from_parquet =
        build_dataset(&parquet_input, &dir.path().join("b.csv"), &Config::default())?;
    assert_eq!(from_csv.rows_out, from_parquet.rows_out);
    assert_eq!(from_csv.fingerprint, from_parquet.fingerprint);
    Ok(())
}

#[test]
fn missing_volume_fails_without_writing() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("bars.csv");
    fs::write(&input, "time,open,high,low,close\n2024-01-01,1,2,0.5,1.5\n")?;
    let output = dir.path().join("features.parquet");

    let err = build_dataset(&input, &output, &Config::default())
        .expect_err("schema error expected");
    assert!(
        err.chain()
            .any(|cause| cause.downcast_ref::<barlabel_rs::SchemaError>().is_some())
    );
    assert!(!output.exists());
    assert!(!dir.path().join("features.preview.csv").exists());
    Ok(())
}

#[test]
fn parquet_with_several_row_groups_builds() -> Result<()> {
    let dir = tempdir()?;
    let csv_input = dir.path().join("bars.csv");
    write_bars_csv(&csv_input, 150, false)?;
    let raw = CsvReader::from_path(&csv_input)?
        .infer_schema(Some(1024))
        .has_header(true)
        .finish()?;

    let mut split = raw.slice(0, 75);
    split.vstack_mut(&raw.slice(75, 75))?;
    assert_eq!(split.column("Time")?.n_chunks(), 2);
    let parquet_input = dir.path().join("bars.parquet");
    ParquetWriter::new(&mut File::create(&parquet_input)?)
        .with_row_group_size(Some(75))
        .finish(&mut split)?;

    let from_csv = build_dataset(&csv_input, &dir.path().join("a.csv"), &Config::default())?;
    let from_parquet =
        build_dataset(&parquet_input, &dir.path().join("b.csv"), &Config::default())?;
    assert_eq!(from_parquet.rows_out, 150 - 39);
    assert_eq!(from_csv.fingerprint, from_parquet.fingerprint);
    Ok(())
}

#[test]
fn blocked_preview_path_fails_without_writing_table() -> Result<()> {
    let dir = tempdir()?;
    let input = dir.path().join("bars.csv");
    write_bars_csv(&input, 120, false)?;
    let output = dir.path().join("features.parquet");
    fs::create_dir(dir.path().join("features.preview.csv"))?;

    assert!(build_dataset(&input, &output, &Config::default()).is_err());
    assert!(!output.exists());
    let leftovers = fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
        .count();
    assert_eq!(leftovers, 0);
    Ok(())
}
