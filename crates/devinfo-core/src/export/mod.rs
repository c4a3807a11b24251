//! Exporters for a finished (or interrupted) run.
//!
//! The collector invokes every registered [`Exporter`] exactly once, from
//! its finalize path, with the final snapshot. An empty snapshot is not an
//! error: exporters skip writing and return `Ok(None)`.

mod chart;
mod csv;
mod text;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::store::Snapshot;

pub use chart::{ChartExporter, ChartLayout, Panel, figure, render_html};
pub use csv::{CsvExporter, render_csv};
pub use text::render_table;

/// File name timestamp layout (no characters that trouble common filesystems).
const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Identity of one collector run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub collector: &'static str,
    pub started: NaiveDateTime,
}

impl RunInfo {
    pub fn new(collector: &'static str, started: NaiveDateTime) -> Self {
        Self { collector, started }
    }

    /// `<run-start>_<collector>.<extension>`
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "{}_{}.{}",
            self.started.format(FILE_TIMESTAMP_FORMAT),
            self.collector,
            extension
        )
    }
}

#[derive(Debug)]
pub enum ExportError {
    Io { path: PathBuf, source: io::Error },
    Json(serde_json::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Io { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            ExportError::Json(e) => write!(f, "failed to encode chart data: {}", e),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io { source, .. } => Some(source),
            ExportError::Json(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Json(e)
    }
}

/// Consumer of the final snapshot of a run.
pub trait Exporter: Send {
    fn name(&self) -> &'static str;

    /// Writes the snapshot. Returns the written path, or `None` when there
    /// was nothing to write.
    fn export(&self, run: &RunInfo, snapshot: &Snapshot) -> Result<Option<PathBuf>, ExportError>;
}

/// Writes `contents` to `dir/file_name`, creating `dir` if needed.
fn write_file(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf, ExportError> {
    let path = dir.join(file_name);
    std::fs::create_dir_all(dir)
        .and_then(|()| std::fs::write(&path, contents))
        .map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_run_file_name() {
        let started = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap();
        let run = RunInfo::new("meminfo", started);
        assert_eq!(run.file_name("csv"), "2024-03-01_09-05-07_meminfo.csv");
        assert_eq!(run.file_name("html"), "2024-03-01_09-05-07_meminfo.html");
    }

    #[test]
    fn test_write_file_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out").join("runs");
        let path = write_file(&nested, "x.csv", "a,b\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n");
    }
}
