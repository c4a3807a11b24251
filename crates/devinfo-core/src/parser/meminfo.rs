//! `/proc/meminfo` dump parser.

use std::time::Duration;

use tracing::warn;

use super::{MalformedRecord, SampleParser};
use crate::export::{ChartLayout, Panel};
use crate::extract::{FieldRule, round2};
use crate::sample::{Metrics, Value};

/// Fields searched in every line, in match priority order.
const FIELDS: [&str; 7] = [
    "MemTotal",
    "MemFree",
    "Buffers",
    "Cached",
    "Mapped",
    "SwapTotal",
    "SwapFree",
];

/// Fields copied into the sample unchanged, in output order.
const PASSTHROUGH: [&str; 5] = ["MemTotal", "MemFree", "Buffers", "Cached", "Mapped"];

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Parses one `cat /proc/meminfo` dump per polling cycle.
///
/// Output fields (MB): `MemTotal, MemFree, Buffers, Cached, Mapped, Swap`,
/// where `Swap = SwapTotal - SwapFree`. A dump missing any input field
/// yields no sample.
#[derive(Debug, Clone)]
pub struct MemInfoParser {
    rules: Vec<FieldRule>,
    found: Metrics,
    interval: Duration,
}

impl Default for MemInfoParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MemInfoParser {
    pub fn new() -> Self {
        Self {
            rules: FIELDS.into_iter().map(FieldRule::new).collect(),
            found: Metrics::new(),
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Sleep between two dumps.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl SampleParser for MemInfoParser {
    fn name(&self) -> &'static str {
        "meminfo"
    }

    fn remote_command(&self) -> &'static [&'static str] {
        &["cat", "/proc/meminfo"]
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    fn feed(&mut self, line: &str) -> Result<Option<Metrics>, MalformedRecord> {
        // First rule that matches claims the line.
        for rule in &self.rules {
            let Some(mb) = rule.extract(line) else {
                continue;
            };
            if self.found.contains(rule.name()) {
                warn!(field = rule.name(), line, "field seen twice in one dump, keeping first");
            } else {
                self.found.insert(rule.name(), Value::Float(mb));
            }
            break;
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<Metrics>, MalformedRecord> {
        let found = std::mem::take(&mut self.found);

        let missing: Vec<&str> = FIELDS
            .iter()
            .copied()
            .filter(|name| !found.contains(name))
            .collect();
        if !missing.is_empty() {
            return Err(MalformedRecord::new(format!(
                "missing fields: {}",
                missing.join(", ")
            )));
        }

        let mut metrics = Metrics::new();
        for name in PASSTHROUGH {
            if let Some(value) = found.get(name) {
                metrics.insert(name, value);
            }
        }

        let total = found.get("SwapTotal").map(|v| v.as_f64()).unwrap_or_default();
        let free = found.get("SwapFree").map(|v| v.as_f64()).unwrap_or_default();
        metrics.insert("Swap", Value::Float(round2(total - free)));

        Ok(Some(metrics))
    }

    fn reset(&mut self) {
        self.found = Metrics::new();
    }

    fn chart_layout(&self) -> ChartLayout {
        ChartLayout::new("Device MemInfo").panel(Panel::all_columns("memory usage(MB)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &[&str] = &[
        "MemTotal:        2048000 kB",
        "MemFree:          512000 kB",
        "MemAvailable:    1024000 kB",
        "Buffers:          105700 kB",
        "Cached:           627320 kB",
        "SwapCached:         4096 kB",
        "Active:           800000 kB",
        "SwapTotal:        102400 kB",
        "SwapFree:          51200 kB",
        "Mapped:            20480 kB",
        "Shmem:              1024 kB",
    ];

    fn parse(lines: &[&str]) -> Result<Option<Metrics>, MalformedRecord> {
        let mut parser = MemInfoParser::new();
        for line in lines {
            assert_eq!(parser.feed(line), Ok(None));
        }
        parser.finish()
    }

    #[test]
    fn test_full_dump_yields_one_sample() {
        let m = parse(DUMP).unwrap().unwrap();
        assert_eq!(m.get("MemTotal"), Some(Value::Float(2000.0)));
        assert_eq!(m.get("MemFree"), Some(Value::Float(500.0)));
        assert_eq!(m.get("Buffers"), Some(Value::Float(103.22)));
        assert_eq!(m.get("Cached"), Some(Value::Float(612.62)));
        assert_eq!(m.get("Mapped"), Some(Value::Float(20.0)));
        assert_eq!(m.get("Swap"), Some(Value::Float(50.0)));
    }

    #[test]
    fn test_swap_inputs_are_dropped() {
        let m = parse(DUMP).unwrap().unwrap();
        assert!(!m.contains("SwapTotal"));
        assert!(!m.contains("SwapFree"));
        assert_eq!(
            m.names().collect::<Vec<_>>(),
            vec!["MemTotal", "MemFree", "Buffers", "Cached", "Mapped", "Swap"]
        );
    }

    #[test]
    fn test_missing_field_drops_cycle() {
        for skip in FIELDS {
            let lines: Vec<&str> = DUMP
                .iter()
                .copied()
                .filter(|l| !l.starts_with(&format!("{}:", skip)))
                .collect();
            let err = parse(&lines).unwrap_err();
            assert!(err.reason.contains(skip), "{} should be reported", skip);
        }
    }

    #[test]
    fn test_duplicate_field_keeps_first() {
        let mut lines = DUMP.to_vec();
        lines.push("MemTotal:        4096000 kB");
        let m = parse(&lines).unwrap().unwrap();
        assert_eq!(m.get("MemTotal"), Some(Value::Float(2000.0)));
    }

    #[test]
    fn test_swap_cached_does_not_match_cached() {
        let mut lines: Vec<&str> = DUMP
            .iter()
            .copied()
            .filter(|l| !l.starts_with("Cached:"))
            .collect();
        lines.insert(0, "SwapCached:  999999 kB");
        assert!(parse(&lines).is_err());
    }

    #[test]
    fn test_finish_resets_for_next_cycle() {
        let mut parser = MemInfoParser::new();
        for line in DUMP {
            parser.feed(line).unwrap();
        }
        assert!(parser.finish().unwrap().is_some());
        // Nothing fed since: the next cycle is incomplete.
        assert!(parser.finish().is_err());
    }

    #[test]
    fn test_reset_discards_partial_dump() {
        let mut parser = MemInfoParser::new();
        parser.feed("MemTotal:  1024 kB").unwrap();
        parser.reset();
        for line in DUMP {
            parser.feed(line).unwrap();
        }
        let m = parser.finish().unwrap().unwrap();
        assert_eq!(m.get("MemTotal"), Some(Value::Float(2000.0)));
    }

    #[test]
    fn test_swap_is_rounded() {
        let lines = [
            "MemTotal: 1 kB",
            "MemFree: 1 kB",
            "Buffers: 1 kB",
            "Cached: 1 kB",
            "Mapped: 1 kB",
            "SwapTotal: 1000 kB",
            "SwapFree: 333 kB",
        ];
        let m = parse(&lines).unwrap().unwrap();
        // 0.98 - 0.33
        assert_eq!(m.get("Swap"), Some(Value::Float(0.65)));
    }

    #[test]
    fn test_polls_every_interval() {
        let parser = MemInfoParser::new().with_interval(Duration::from_millis(250));
        assert_eq!(parser.poll_interval(), Some(Duration::from_millis(250)));
        assert_eq!(parser.remote_command(), &["cat", "/proc/meminfo"]);
    }
}
