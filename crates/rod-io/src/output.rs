use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{IoError, Result};

/// How a CSV series treats existing files and intermediate rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesMode {
    /// Truncate the file and write one row per converged increment.
    PerIncrement,
    /// Append to the file and write only the final row of the run.
    AppendFinal,
}

/// Comma-separated numeric time series, flushed after every row so a killed
/// run leaves only complete rows behind.
#[derive(Debug)]
pub struct CsvSeries {
    path: PathBuf,
    writer: BufWriter<File>,
    mode: SeriesMode,
    columns: Option<usize>,
    pending: Option<Vec<f64>>,
    rows_written: usize,
}

impl CsvSeries {
    pub fn create(path: impl AsRef<Path>, header: Option<&[&str]>, mode: SeriesMode) -> Result<Self> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;

        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            SeriesMode::PerIncrement => options.write(true).truncate(true),
            SeriesMode::AppendFinal => options.append(true),
        };
        let file = options.open(path).map_err(|source| IoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let is_empty = file.metadata().map(|m| m.len() == 0)?;

        let mut series = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            mode,
            columns: header.map(<[&str]>::len),
            pending: None,
            rows_written: 0,
        };

        if let Some(names) = header
            && is_empty
        {
            writeln!(series.writer, "{}", names.join(","))?;
            series.writer.flush()?;
        }
        Ok(series)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Records one converged increment.
    pub fn push_row(&mut self, row: &[f64]) -> Result<()> {
        match self.columns {
            Some(expected) if expected != row.len() => {
                return Err(IoError::ColumnCount {
                    expected,
                    found: row.len(),
                });
            }
            None => self.columns = Some(row.len()),
            _ => {}
        }

        match self.mode {
            SeriesMode::PerIncrement => self.write_row(row),
            SeriesMode::AppendFinal => {
                self.pending = Some(row.to_vec());
                Ok(())
            }
        }
    }

    /// Writes the row held back in [`SeriesMode::AppendFinal`].
    pub fn finish(&mut self) -> Result<()> {
        if let Some(row) = self.pending.take() {
            self.write_row(&row)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Drops the held-back row of a failed run; rows already written stay.
    pub fn discard(&mut self) -> Result<()> {
        self.pending = None;
        self.writer.flush()?;
        Ok(())
    }

    fn write_row(&mut self, row: &[f64]) -> Result<()> {
        let line = row
            .iter()
            .map(|x| format_value(*x))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }
}

pub fn format_value(x: f64) -> String {
    if x == 0.0 {
        "0".to_string()
    } else {
        format!("{x:.12e}")
    }
}

/// Serializes `value` as pretty JSON.
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub(crate) fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
