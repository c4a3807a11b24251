//! Sample parsers.
//!
//! A parser turns the lines of one command invocation into [`Metrics`].
//! The collector drives it with [`SampleParser::feed`] for every decoded
//! line and [`SampleParser::finish`] when the stream ends, then decides
//! from [`SampleParser::poll_interval`] whether to respawn the command.

mod meminfo;
mod vmstat;

use std::fmt;
use std::time::Duration;

use crate::export::ChartLayout;
use crate::sample::Metrics;

pub use meminfo::MemInfoParser;
pub use vmstat::VmStatParser;

/// A line or cycle that could not be turned into a sample.
///
/// Always recoverable: the collector logs it and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed record: {}", self.reason)
    }
}

impl std::error::Error for MalformedRecord {}

/// Variant-specific parsing strategy.
pub trait SampleParser: Send + 'static {
    /// Short name used for logs and export file names.
    fn name(&self) -> &'static str;

    /// Command to run on the device, without the shell prefix.
    fn remote_command(&self) -> &'static [&'static str];

    /// `Some(interval)`: the command is a one-shot dump, rerun after
    /// `interval` each time it ends. `None`: the command streams by itself
    /// and its end is terminal.
    fn poll_interval(&self) -> Option<Duration>;

    /// Consumes one decoded line. `Ok(None)` means nothing to emit yet.
    fn feed(&mut self, line: &str) -> Result<Option<Metrics>, MalformedRecord>;

    /// Called once when the stream ends.
    fn finish(&mut self) -> Result<Option<Metrics>, MalformedRecord>;

    /// Discards partial state before a fresh invocation.
    fn reset(&mut self) {}

    /// How exported charts group this parser's columns.
    fn chart_layout(&self) -> ChartLayout;
}
