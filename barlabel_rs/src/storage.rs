use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::io::parquet::{ParquetCompression, ParquetWriter};
use polars::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::{Config, PREVIEW_ROWS};
use crate::data::{TableFormat, table_format};

/// Write `frame` to `path` as Parquet (Zstd) or CSV depending on the
/// extension. Data lands in a sibling temp file that is renamed into place.
pub fn write_table(frame: &mut DataFrame, path: &Path) -> Result<()> {
    stage_table(frame, path)?.commit()?;
    info!(rows = frame.height(), path = %path.display(), "Wrote table");
    Ok(())
}

/// A table fully written to a temp sibling of its destination. The temp file
/// is removed on drop unless [`StagedTable::commit`] moved it into place.
#[derive(Debug)]
pub struct StagedTable {
    tmp_path: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl StagedTable {
    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.tmp_path, &self.path).with_context(|| {
            format!(
                "Unable to move {} into place at {}",
                self.tmp_path.display(),
                self.path.display()
            )
        })?;
        self.committed = true;
        Ok(self.path.clone())
    }
}

impl Drop for StagedTable {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

pub fn stage_table(frame: &mut DataFrame, path: &Path) -> Result<StagedTable> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create output directory {}", parent.display()))?;
    }
    let staged = StagedTable {
        tmp_path: temp_sibling(path),
        path: path.to_path_buf(),
        committed: false,
    };
    write_format(frame, &staged.tmp_path, table_format(path))?;
    Ok(staged)
}

/// Write the dataset and a CSV preview of its first [`PREVIEW_ROWS`] rows.
/// Neither file is left at its final path unless both are in place.
pub fn write_dataset(frame: &mut DataFrame, output: &Path) -> Result<PathBuf> {
    let table = stage_table(frame, output)
        .with_context(|| format!("Failed to write dataset {}", output.display()))?;
    let mut head = frame.head(Some(PREVIEW_ROWS));
    let preview = stage_table(&mut head, &preview_path(output))
        .with_context(|| format!("Failed to write preview for {}", output.display()))?;

    let preview = preview.commit()?;
    if let Err(err) = table.commit() {
        let _ = fs::remove_file(&preview);
        return Err(err);
    }
    debug!(rows = head.height(), path = %preview.display(), "Wrote preview");
    info!(
        rows = frame.height(),
        path = %output.display(),
        preview = %preview.display(),
        "Wrote table and preview"
    );
    Ok(preview)
}

fn write_format(frame: &mut DataFrame, path: &Path, format: TableFormat) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
    match format {
        TableFormat::Parquet => {
            ParquetWriter::new(&mut file)
                .with_compression(ParquetCompression::Zstd(None))
                .finish(frame)
                .with_context(|| format!("Failed to write Parquet table {}", path.display()))?;
        }
        TableFormat::Csv => {
            CsvWriter::new(&mut file)
                .include_header(true)
                .finish(frame)
                .with_context(|| format!("Failed to write CSV table {}", path.display()))?;
        }
    }
    file.sync_all()
        .with_context(|| format!("Unable to flush {}", path.display()))?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

/// `<dir>/<stem>.preview.csv` next to the main output.
pub fn preview_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{stem}.preview.csv"))
}


/// SHA-256 of the table's CSV serialization, hex encoded.
pub fn fingerprint(frame: &DataFrame) -> Result<String> {
    let mut hasher = HashingWriter::default();
    let mut copy = frame.clone();
    CsvWriter::new(&mut hasher)
        .include_header(true)
        .finish(&mut copy)
        .context("Failed to serialize table for fingerprinting")?;
    Ok(hasher.hex_digest())
}

/// Stable hash of the parameters that shape the output table.
pub fn config_fingerprint(config: &Config) -> Result<String> {
    let serialized = toml::to_string(config).context("Failed to serialize config")?;
    Ok(hex::encode(Sha256::digest(serialized.as_bytes())))
}

#[derive(Default)]
struct HashingWriter {
    hasher: Sha256,
}

impl HashingWriter {
    fn hex_digest(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
