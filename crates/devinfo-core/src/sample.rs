//! Sample data model.
//!
//! A [`Sample`] is one polling cycle's worth of metrics, stamped with the
//! local wall-clock time at second resolution. Metric order is preserved as
//! produced by the parser so exporters lay out columns predictably.

use std::fmt;

use chrono::{Local, NaiveDateTime, SubsecRound};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Timestamp layout used for CSV row indexes, chart axes and the live API.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single metric value.
///
/// Raw counters stay integral; memory conversions are floats rounded to
/// two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::Float(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Int(v) => write!(f, "{}", v),
            // Keep a trailing ".0" so whole megabytes still read as floats.
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => write!(f, "{:.1}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Ordered mapping from metric name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    entries: Vec<(&'static str, Value)>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, replacing any earlier value in place.
    pub fn insert(&mut self, name: &'static str, value: Value) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| *n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Value)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (name, value)) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(&'static str, Value)> for Metrics {
    fn from_iter<I: IntoIterator<Item = (&'static str, Value)>>(iter: I) -> Self {
        let mut metrics = Metrics::new();
        for (name, value) in iter {
            metrics.insert(name, value);
        }
        metrics
    }
}

impl Serialize for Metrics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// One timestamped record. Never mutated once appended to a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
    pub metrics: Metrics,
}

impl Sample {
    pub fn new(timestamp: NaiveDateTime, metrics: Metrics) -> Self {
        Self { timestamp, metrics }
    }

    /// Stamps `metrics` with the current local time, truncated to seconds.
    pub fn now(metrics: Metrics) -> Self {
        Self::new(local_now(), metrics)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.metrics.get(name)
    }

    /// Timestamp rendered with [`TIMESTAMP_FORMAT`].
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Current local wall-clock time at second resolution.
pub fn local_now() -> NaiveDateTime {
    Local::now().trunc_subsecs(0).naive_local()
}

fn serialize_timestamp<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 5)
            .unwrap()
    }

    #[test]
    fn test_metrics_preserve_insertion_order() {
        let mut m = Metrics::new();
        m.insert("b", Value::Int(1));
        m.insert("a", Value::Int(2));
        m.insert("b", Value::Int(3));
        assert_eq!(m.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(m.get("b"), Some(Value::Int(3)));
    }

    #[test]
    fn test_metrics_display() {
        let m: Metrics = [("us", Value::Int(26)), ("free", Value::Float(174.29))]
            .into_iter()
            .collect();
        assert_eq!(m.to_string(), "us=26 free=174.29");
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(40).to_string(), "40");
        assert_eq!(Value::Float(2000.0).to_string(), "2000.0");
        assert_eq!(Value::Float(174.29).to_string(), "174.29");
    }

    #[test]
    fn test_sample_timestamp_string() {
        let sample = Sample::new(ts(), Metrics::new());
        assert_eq!(sample.timestamp_string(), "2024-03-01 12:30:05");
    }

    #[test]
    fn test_sample_serializes_as_flat_json() {
        let metrics: Metrics = [("MemTotal", Value::Float(2000.0)), ("r", Value::Int(1))]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&Sample::new(ts(), metrics)).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":"2024-03-01 12:30:05","metrics":{"MemTotal":2000.0,"r":1}}"#
        );
    }

    #[test]
    fn test_local_now_has_no_subseconds() {
        use chrono::Timelike;
        assert_eq!(local_now().nanosecond(), 0);
    }
}
