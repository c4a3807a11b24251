//! devinfo-core: remote device health sampling.
//!
//! Provides:
//! - `source`: line sources over an external shell command (real and scripted)
//! - `extract`: field extraction from `key: value` and table-style lines
//! - `parser`: sample parsers for `/proc/meminfo` dumps and `vmstat` streams
//! - `sample`: the sample data model
//! - `store`: the shared, append-only time series
//! - `collector`: the background sampling loop and its lifecycle
//! - `export`: CSV, chart and text renderings of a finished series

pub mod collector;
pub mod export;
pub mod extract;
pub mod parser;
pub mod sample;
pub mod source;
pub mod store;

pub use collector::{
    CollectError, Collector, CollectorState, DeviceMonitor, MemInfoCollector, StopHandle,
    Termination, VmStatCollector,
};
pub use parser::{MalformedRecord, MemInfoParser, SampleParser, VmStatParser};
pub use sample::{Metrics, Sample, Value};
pub use source::{CommandRunner, CommandSpec, LineSource, ProcessRunner, ReadEvent, SourceError};
pub use store::{Snapshot, TimeSeries};

/// Crate version, shared by the binaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
