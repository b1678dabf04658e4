//! Text log of a solver run.
//!
//! Convergence lines use fixed prefixes so external scripts can pick them up
//! by line matching:
//!
//! ```text
//! module 'nonlin' : residual scale factor = 1.0000e3
//! module 'nonlin' : iter = 0, scaled residual = 1.0000e0
//! module 'nonlin' : iter = 1, scaled residual = 3.1416e-5
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::{IoError, Result};
use crate::output::ensure_parent_dir;

#[derive(Debug)]
pub struct RunLog {
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    echo: bool,
    lines: usize,
}

impl RunLog {
    /// Creates (truncates) the log file and writes the header.
    pub fn create(path: impl AsRef<Path>, title: &str, echo: bool) -> Result<Self> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let file = File::create(path).map_err(|source| IoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut log = Self {
            path: Some(path.to_path_buf()),
            writer: Some(BufWriter::new(file)),
            echo,
            lines: 0,
        };
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        log.line(&format!("# {title}"))?;
        log.line(&format!("# started {stamp}"))?;
        Ok(log)
    }

    /// A log that discards everything; used by library callers and tests that
    /// do not care about the text output.
    pub fn disabled() -> Self {
        Self {
            path: None,
            writer: None,
            echo: false,
            lines: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn lines_written(&self) -> usize {
        self.lines
    }

    pub fn line(&mut self, text: &str) -> Result<()> {
        if self.echo {
            println!("{text}");
        }
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{text}")?;
            writer.flush()?;
            self.lines += 1;
        }
        Ok(())
    }

    pub fn scale_factor(&mut self, module: &str, value: f64) -> Result<()> {
        self.line(&format!(
            "module '{module}' : residual scale factor = {value:.4e}"
        ))
    }

    pub fn iteration(&mut self, module: &str, iter: usize, scaled_residual: f64) -> Result<()> {
        self.line(&format!(
            "module '{module}' : iter = {iter}, scaled residual = {scaled_residual:.4e}"
        ))
    }

    pub fn info(&mut self, module: &str, message: &str) -> Result<()> {
        self.line(&format!("module '{module}' : {message}"))
    }

    pub fn warn(&mut self, module: &str, message: &str) -> Result<()> {
        if !self.echo {
            eprintln!("warning: {message}");
        }
        self.line(&format!("module '{module}' : warning: {message}"))
    }

    pub fn error(&mut self, message: &str) -> Result<()> {
        self.line(&format!("error: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convergence_lines_match_expected_prefixes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("run.log");
        let mut log = RunLog::create(&path, "beam test", false).expect("log");
        log.scale_factor("nonlin", 1000.0).expect("line");
        log.iteration("nonlin", 0, 1.0).expect("line");
        log.iteration("nonlin", 1, 3.2e-4).expect("line");
        log.error("increment 3 failed").expect("line");

        let content = std::fs::read_to_string(&path).expect("readable");
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[0].starts_with("# beam test"));
        assert_eq!(lines[2], "module 'nonlin' : residual scale factor = 1.0000e3");
        assert_eq!(lines[3], "module 'nonlin' : iter = 0, scaled residual = 1.0000e0");
        assert_eq!(lines[4], "module 'nonlin' : iter = 1, scaled residual = 3.2000e-4");
        assert_eq!(lines[5], "error: increment 3 failed");
        assert_eq!(log.lines_written(), 6);

        let iter_values: Vec<f64> = lines
            .iter()
            .filter_map(|l| l.strip_prefix("module 'nonlin' : iter = "))
            .filter_map(|rest| rest.split("scaled residual = ").nth(1))
            .map(|v| v.parse::<f64>().expect("float"))
            .collect();
        assert_eq!(iter_values, vec![1.0, 3.2e-4]);
    }

    #[test]
    fn disabled_log_accepts_lines() {
        let mut log = RunLog::disabled();
        log.iteration("nonlin", 0, 0.5).expect("line");
        assert_eq!(log.lines_written(), 0);
        assert!(log.path().is_none());
    }
}
