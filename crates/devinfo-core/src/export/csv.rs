//! CSV export: one row per sample, one column per field.
//!
//! The first column is the sample timestamp and has an empty header, so
//! the file reads back as a timestamp-indexed table.

use std::fmt::Write as _;
use std::path::PathBuf;

use super::{ExportError, Exporter, RunInfo, write_file};
use crate::store::Snapshot;

/// Writes `<run-start>_<collector>.csv` into a directory.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
}

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Exporter for CsvExporter {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn export(&self, run: &RunInfo, snapshot: &Snapshot) -> Result<Option<PathBuf>, ExportError> {
        if snapshot.is_empty() {
            return Ok(None);
        }
        let path = write_file(&self.dir, &run.file_name("csv"), &render_csv(snapshot))?;
        Ok(Some(path))
    }
}

/// Renders the snapshot as CSV text. Fields missing from a sample are left empty.
pub fn render_csv(snapshot: &Snapshot) -> String {
    let columns = snapshot.columns();
    let mut out = String::new();

    for column in &columns {
        out.push(',');
        out.push_str(column);
    }
    out.push('\n');

    for sample in snapshot.iter() {
        out.push_str(&sample.timestamp_string());
        for column in &columns {
            out.push(',');
            if let Some(value) = sample.get(column) {
                let _ = write!(out, "{}", value);
            }
        }
        out.push('\n');
    }

    out
}
