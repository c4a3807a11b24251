//! `vmstat 1` stream parser.
//!
//! ```text
//! procs -----------memory---------- ---swap-- -----io---- -system-- ----cpu----
//!  r  b   swpd   free   buff  cache   si   so    bi    bo   in   cs us sy id wa
//!  0  0 616392 178468 105700 627320   12   19  1018   232    0  680 26 14 59  0
//! ```

use std::time::Duration;

use super::{MalformedRecord, SampleParser};
use crate::export::{ChartLayout, Panel};
use crate::extract::{VMSTAT_COLUMNS, is_printable, is_vmstat_header, kb_to_mb, split_row};
use crate::sample::{Metrics, Value};

/// How each of the 16 columns is stored.
#[derive(Clone, Copy)]
enum Column {
    Count(&'static str),
    Megabytes(&'static str),
}

const COLUMNS: [Column; VMSTAT_COLUMNS] = [
    Column::Count("r"),
    Column::Count("b"),
    Column::Megabytes("swap"),
    Column::Megabytes("free"),
    Column::Megabytes("buffer"),
    Column::Megabytes("cache"),
    Column::Count("si"),
    Column::Count("so"),
    Column::Count("bi"),
    Column::Count("bo"),
    Column::Count("in"),
    Column::Count("cs"),
    Column::Count("us"),
    Column::Count("sy"),
    Column::Count("id"),
    Column::Count("wa"),
];

/// Parses each `vmstat` data row into one sample.
///
/// Memory columns are converted from KB to MB; `cpu_u = us + sy` is
/// appended. Header rows are ignored, anything else that is not a
/// 16-column numeric row is malformed.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmStatParser;

impl VmStatParser {
    pub fn new() -> Self {
        Self
    }
}

impl SampleParser for VmStatParser {
    fn name(&self) -> &'static str {
        "vmstat"
    }

    fn remote_command(&self) -> &'static [&'static str] {
        &["vmstat", "1"]
    }

    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    fn feed(&mut self, line: &str) -> Result<Option<Metrics>, MalformedRecord> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if !is_printable(line) {
            return Err(MalformedRecord::new("non-printable characters"));
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if is_vmstat_header(&tokens) {
            return Ok(None);
        }
        let Some(tokens) = split_row(line, VMSTAT_COLUMNS) else {
            return Err(MalformedRecord::new(format!(
                "expected {} columns, got {}",
                VMSTAT_COLUMNS,
                tokens.len()
            )));
        };

        let mut metrics = Metrics::new();
        for (column, token) in COLUMNS.iter().zip(&tokens) {
            match *column {
                Column::Count(name) => {
                    let value = token
                        .parse::<i64>()
                        .map_err(|_| MalformedRecord::new(format!("invalid {}: {:?}", name, token)))?;
                    metrics.insert(name, Value::Int(value));
                }
                Column::Megabytes(name) => {
                    let kb = token
                        .parse::<u64>()
                        .map_err(|_| MalformedRecord::new(format!("invalid {}: {:?}", name, token)))?;
                    metrics.insert(name, Value::Float(kb_to_mb(kb)));
                }
            }
        }

        let us = metrics.get("us").and_then(|v| v.as_i64()).unwrap_or_default();
        let sy = metrics.get("sy").and_then(|v| v.as_i64()).unwrap_or_default();
        metrics.insert("cpu_u", Value::Int(us + sy));

        Ok(Some(metrics))
    }

    fn finish(&mut self) -> Result<Option<Metrics>, MalformedRecord> {
        Ok(None)
    }

    fn chart_layout(&self) -> ChartLayout {
        ChartLayout::new("Device VmStat")
            .panel(Panel::columns("CPU Info", "Usage(%)", &["us", "sy", "wa", "cpu_u"]))
            .panel(Panel::columns(
                "Memory Info",
                "Memory Usage(MB)",
                &["swap", "free", "buffer", "cache"],
            ))
            .panel(Panel::columns("IO Info", "IO Through(KB)", &["si", "so", "bi", "bo"]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPS: &str =
        "procs -----------memory---------- ---swap-- -----io---- -system-- ----cpu----";
    const LABELS: &str =
        " r  b   swpd   free   buff  cache   si   so    bi    bo   in   cs us sy id wa";
    const ROW: &str =
        " 0  0 616392 178468 105700 627320   12   19  1018   232    0  680 26 14 59  0";

    #[test]
    fn test_headers_emit_nothing() {
        let mut parser = VmStatParser::new();
        assert_eq!(parser.feed(GROUPS), Ok(None));
        assert_eq!(parser.feed(LABELS), Ok(None));
    }

    #[test]
    fn test_data_row() {
        let mut parser = VmStatParser::new();
        let m = parser.feed(ROW).unwrap().unwrap();

        assert_eq!(m.get("r"), Some(Value::Int(0)));
        assert_eq!(m.get("b"), Some(Value::Int(0)));
        assert_eq!(m.get("swap"), Some(Value::Float(601.95)));
        assert_eq!(m.get("free"), Some(Value::Float(174.29)));
        assert_eq!(m.get("buffer"), Some(Value::Float(103.22)));
        assert_eq!(m.get("cache"), Some(Value::Float(612.62)));
        assert_eq!(m.get("si"), Some(Value::Int(12)));
        assert_eq!(m.get("so"), Some(Value::Int(19)));
        assert_eq!(m.get("bi"), Some(Value::Int(1018)));
        assert_eq!(m.get("bo"), Some(Value::Int(232)));
        assert_eq!(m.get("in"), Some(Value::Int(0)));
        assert_eq!(m.get("cs"), Some(Value::Int(680)));
        assert_eq!(m.get("us"), Some(Value::Int(26)));
        assert_eq!(m.get("sy"), Some(Value::Int(14)));
        assert_eq!(m.get("id"), Some(Value::Int(59)));
        assert_eq!(m.get("wa"), Some(Value::Int(0)));
        assert_eq!(m.get("cpu_u"), Some(Value::Int(40)));
        assert_eq!(m.len(), 17);
    }

    #[test]
    fn test_cpu_u_is_us_plus_sy() {
        let mut parser = VmStatParser::new();
        for (us, sy) in [(0, 0), (99, 1), (70, 60), (5, 3)] {
            let row = format!("1 0 0 0 0 0 0 0 0 0 0 0 {} {} 0 0", us, sy);
            let m = parser.feed(&row).unwrap().unwrap();
            assert_eq!(m.get("cpu_u"), Some(Value::Int(us + sy)));
        }
    }

    #[test]
    fn test_wrong_column_count_is_malformed() {
        let mut parser = VmStatParser::new();
        let truncated = " 0  0 616392 178468 105700 627320   12   19  1018";
        assert!(parser.feed(truncated).is_err());
        let extra = format!("{} 7", ROW);
        assert!(parser.feed(&extra).is_err());
    }

    #[test]
    fn test_non_numeric_is_malformed() {
        let mut parser = VmStatParser::new();
        let row = " 0  0 616392 178468 105700 627320   12   19  1018   232    0  680 26 xx 59  0";
        let err = parser.feed(row).unwrap_err();
        assert!(err.reason.contains("sy"));
    }

    #[test]
    fn test_non_printable_is_malformed() {
        let mut parser = VmStatParser::new();
        assert!(parser.feed("0 0 1\u{1b}[0m 2").is_err());
    }

    #[test]
    fn test_blank_line_is_ignored() {
        let mut parser = VmStatParser::new();
        assert_eq!(parser.feed("   "), Ok(None));
    }

    #[test]
    fn test_reparse_is_idempotent() {
        let mut parser = VmStatParser::new();
        let first = parser.feed(ROW).unwrap();
        let second = parser.feed(ROW).unwrap();
        assert_eq!(first, second);
        assert_eq!(parser.finish(), Ok(None));
    }

    #[test]
    fn test_chart_panels() {
        let layout = VmStatParser::new().chart_layout();
        let titles: Vec<&str> = layout.panels.iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["CPU Info", "Memory Info", "IO Info"]);
    }
}
