//! Background sampling loop and its lifecycle.
//!
//! A [`Collector`] owns one parser, one command runner and one
//! [`TimeSeries`]. `start()` spawns a worker thread that reads the command's
//! output, feeds it to the parser and appends samples; readers poll
//! [`Collector::info`] from any thread meanwhile.
//!
//! ```text
//!   Idle ──start()──► Running ──stop() / end of stream / fatal──► Stopped
//!     └──────────── start() spawn failure ───────────────────────────┘
//! ```
//!
//! Whatever ends the run, the exporters run once with the final snapshot
//! before the collector settles in `Stopped`. A panicking sampling thread
//! is finalized by `join()` instead. Stopping is cooperative:
//! the stop flag is checked between reads, so a stop request waits for at
//! most one pending read. A command that hangs without output hangs the
//! collector with it.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::export::{Exporter, RunInfo};
use crate::parser::{MemInfoParser, SampleParser, VmStatParser};
use crate::sample::{Metrics, Sample, local_now};
use crate::source::{CommandRunner, CommandSpec, LineSource, ProcessRunner, ReadEvent, SourceError};
use crate::store::{Snapshot, TimeSeries};

/// Granularity of stop checks while sleeping between polls.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Log a progress line every this many samples.
const PROGRESS_EVERY: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectorState::Idle => "idle",
            CollectorState::Running => "running",
            CollectorState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// `stop()` was requested.
    Stopped,
    /// The command closed its output and the parser does not poll.
    EndOfStream,
}

#[derive(Debug, Clone)]
pub enum CollectError {
    AlreadyStarted,
    NotStarted,
    /// The command failed to start, or failed while running.
    Source(SourceError),
    /// The worker thread could not be created.
    Thread(Arc<io::Error>),
    /// The worker thread panicked before finalizing.
    WorkerPanicked,
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::AlreadyStarted => write!(f, "collector was already started"),
            CollectError::NotStarted => write!(f, "collector was never started"),
            CollectError::Source(e) => write!(f, "{}", e),
            CollectError::Thread(e) => write!(f, "failed to start sampling thread: {}", e),
            CollectError::WorkerPanicked => write!(f, "sampling thread panicked"),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Source(e) => Some(e),
            CollectError::Thread(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<SourceError> for CollectError {
    fn from(e: SourceError) -> Self {
        CollectError::Source(e)
    }
}

/// Cloneable stop request, safe to call from a signal handler thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    /// Requests a stop. Returns `true` for the first request only.
    pub fn stop(&self) -> bool {
        !self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, waking early on a stop request.
    /// Returns `false` if a stop was requested.
    fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while remaining > Duration::ZERO && !self.is_stopped() {
            let step = remaining.min(STOP_POLL);
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        !self.is_stopped()
    }
}

type Outcome = Result<Termination, CollectError>;

/// Samples one device metric source on a background thread.
pub struct Collector<P: SampleParser, R: CommandRunner = ProcessRunner> {
    name: &'static str,
    shell: Vec<String>,
    parser: Option<P>,
    runner: Option<R>,
    exporters: Vec<Box<dyn Exporter>>,
    series: TimeSeries,
    stop: StopHandle,
    state: Arc<Mutex<CollectorState>>,
    worker: Option<JoinHandle<Outcome>>,
    outcome: Option<Outcome>,
    /// Taken by whoever finalizes first: the worker, or `start`/`join`
    /// when the worker never ran or panicked.
    finalizer: Arc<Mutex<Option<Finalizer>>>,
}

/// Polls `/proc/meminfo` once per interval.
pub type MemInfoCollector<R = ProcessRunner> = Collector<MemInfoParser, R>;

/// Follows a `vmstat 1` stream.
pub type VmStatCollector<R = ProcessRunner> = Collector<VmStatParser, R>;

impl<P: SampleParser> Collector<P, ProcessRunner> {
    /// Collector running real commands.
    pub fn new(parser: P) -> Self {
        Self::with_runner(parser, ProcessRunner::new())
    }
}

impl<P: SampleParser, R: CommandRunner> Collector<P, R> {
    pub fn with_runner(parser: P, runner: R) -> Self {
        Self {
            name: parser.name(),
            shell: Vec::new(),
            parser: Some(parser),
            runner: Some(runner),
            exporters: Vec::new(),
            series: TimeSeries::new(),
            stop: StopHandle::default(),
            state: Arc::new(Mutex::new(CollectorState::Idle)),
            worker: None,
            outcome: None,
            finalizer: Arc::new(Mutex::new(None)),
        }
    }

    /// Prefix that reaches the device, e.g. `["adb", "shell"]`.
    /// Empty runs the command on this host.
    pub fn shell<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell = prefix.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an exporter invoked once when the run ends.
    pub fn exporter(mut self, exporter: Box<dyn Exporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> CollectorState {
        *lock(&self.state)
    }

    /// Snapshot of everything collected so far.
    pub fn info(&self) -> Snapshot {
        self.series.snapshot()
    }

    /// Shared handle to the live series, for readers on other threads.
    pub fn series(&self) -> TimeSeries {
        self.series.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Spawns the command and the sampling thread.
    ///
    /// A command that cannot be spawned is reported here, and the collector
    /// goes straight to `Stopped` without entering `Running`.
    pub fn start(&mut self) -> Result<(), CollectError> {
        if self.state() != CollectorState::Idle {
            return Err(CollectError::AlreadyStarted);
        }
        let (Some(parser), Some(runner)) = (self.parser.take(), self.runner.take()) else {
            return Err(CollectError::AlreadyStarted);
        };

        let command = CommandSpec::through_shell(&self.shell, parser.remote_command());
        *lock(&self.finalizer) = Some(Finalizer {
            run: RunInfo::new(self.name, local_now()),
            exporters: std::mem::take(&mut self.exporters),
            series: self.series.clone(),
        });

        info!(collector = self.name, command = %command, "starting collector");
        let source = match runner.open(&command) {
            Ok(source) => source,
            Err(e) => {
                error!(collector = self.name, error = %e, "command failed to start");
                self.finalize_pending();
                return Err(self.fail(e.into()));
            }
        };

        // Running before the worker exists, so its Stopped always lands last.
        self.set_state(CollectorState::Running);

        let worker = Worker {
            name: self.name,
            parser,
            runner,
            command,
            series: self.series.clone(),
            stop: self.stop.clone(),
            state: self.state.clone(),
            finalizer: self.finalizer.clone(),
            appended: 0,
        };
        let spawned = thread::Builder::new()
            .name(format!("devinfo-{}", self.name))
            .spawn(move || worker.run(source));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!(collector = self.name, error = %e, "failed to spawn sampling thread");
                // The worker was dropped unrun along with the closure.
                self.finalize_pending();
                Err(self.fail(CollectError::Thread(Arc::new(e))))
            }
        }
    }

    /// Requests the loop to exit at its next checkpoint. Idempotent.
    pub fn stop(&mut self) {
        if self.stop.stop() {
            debug!(collector = self.name, "stop requested");
        }
        if self.state() == CollectorState::Idle {
            self.settle(Ok(Termination::Stopped));
        }
    }

    /// Waits for the loop to exit and finalize to complete.
    ///
    /// Returns how the run ended; later calls return the same result.
    pub fn join(&mut self) -> Result<Termination, CollectError> {
        if let Some(handle) = self.worker.take() {
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(collector = self.name, "sampling thread panicked, exporting partial series");
                    self.finalize_pending();
                    self.set_state(CollectorState::Stopped);
                    Err(CollectError::WorkerPanicked)
                }
            };
            self.outcome = Some(outcome);
        }
        self.outcome.clone().unwrap_or(Err(CollectError::NotStarted))
    }

    fn set_state(&self, state: CollectorState) {
        *lock(&self.state) = state;
    }

    /// Runs the exporters unless the worker already did.
    fn finalize_pending(&self) {
        let pending = lock(&self.finalizer).take();
        if let Some(finalizer) = pending {
            finalizer.finish();
        }
    }

    /// Records a terminal outcome reached without a worker thread.
    fn settle(&mut self, outcome: Outcome) {
        self.set_state(CollectorState::Stopped);
        self.outcome = Some(outcome);
    }

    fn fail(&mut self, err: CollectError) -> CollectError {
        self.settle(Err(err.clone()));
        err
    }
}

impl<P: SampleParser, R: CommandRunner> Drop for Collector<P, R> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop.stop();
            let _ = self.join();
        }
    }
}

/// Object-safe view of a collector, independent of its parser type.
pub trait DeviceMonitor: Send {
    fn name(&self) -> &'static str;
    fn state(&self) -> CollectorState;
    fn start(&mut self) -> Result<(), CollectError>;
    fn stop(&mut self);
    fn join(&mut self) -> Result<Termination, CollectError>;
    fn info(&self) -> Snapshot;
    fn series(&self) -> TimeSeries;
    fn stop_handle(&self) -> StopHandle;
}

impl<P: SampleParser, R: CommandRunner> DeviceMonitor for Collector<P, R> {
    fn name(&self) -> &'static str {
        Collector::name(self)
    }

    fn state(&self) -> CollectorState {
        Collector::state(self)
    }

    fn start(&mut self) -> Result<(), CollectError> {
        Collector::start(self)
    }

    fn stop(&mut self) {
        Collector::stop(self)
    }

    fn join(&mut self) -> Result<Termination, CollectError> {
        Collector::join(self)
    }

    fn info(&self) -> Snapshot {
        Collector::info(self)
    }

    fn series(&self) -> TimeSeries {
        Collector::series(self)
    }

    fn stop_handle(&self) -> StopHandle {
        Collector::stop_handle(self)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hands the final snapshot to every exporter. Consumed on use, so it runs once.
struct Finalizer {
    run: RunInfo,
    exporters: Vec<Box<dyn Exporter>>,
    series: TimeSeries,
}

impl Finalizer {
    fn finish(self) {
        let snapshot = self.series.snapshot();
        for exporter in &self.exporters {
            match exporter.export(&self.run, &snapshot) {
                Ok(Some(path)) => info!(
                    collector = self.run.collector,
                    exporter = exporter.name(),
                    path = %path.display(),
                    samples = snapshot.len(),
                    "series exported"
                ),
                Ok(None) => info!(
                    collector = self.run.collector,
                    exporter = exporter.name(),
                    "no samples, nothing exported"
                ),
                Err(e) => error!(
                    collector = self.run.collector,
                    exporter = exporter.name(),
                    error = %e,
                    "export failed"
                ),
            }
        }
    }
}

/// State moved onto the sampling thread.
struct Worker<P: SampleParser, R: CommandRunner> {
    name: &'static str,
    parser: P,
    runner: R,
    command: CommandSpec,
    series: TimeSeries,
    stop: StopHandle,
    state: Arc<Mutex<CollectorState>>,
    finalizer: Arc<Mutex<Option<Finalizer>>>,
    appended: u64,
}

impl<P: SampleParser, R: CommandRunner> Worker<P, R> {
    fn run(mut self, mut source: R::Source) -> Outcome {
        let outcome = self.sample(&mut source);
        // Kill a still-running command before exporting.
        drop(source);

        match &outcome {
            Ok(termination) => info!(
                collector = self.name,
                samples = self.appended,
                ?termination,
                "collector finished"
            ),
            Err(e) => error!(
                collector = self.name,
                samples = self.appended,
                error = %e,
                "collector failed, exporting partial series"
            ),
        }

        let pending = lock(&self.finalizer).take();
        if let Some(finalizer) = pending {
            finalizer.finish();
        }
        *lock(&self.state) = CollectorState::Stopped;
        outcome
    }

    fn sample(&mut self, source: &mut R::Source) -> Outcome {
        loop {
            if self.stop.is_stopped() {
                return Ok(Termination::Stopped);
            }
            let event = source.read_line();
            // A stop that arrived during the read wins over what the read returned.
            if self.stop.is_stopped() {
                return Ok(Termination::Stopped);
            }

            match event? {
                ReadEvent::Line(line) => match self.parser.feed(&line) {
                    Ok(Some(metrics)) => self.append(metrics),
                    Ok(None) => {}
                    Err(e) => warn!(collector = self.name, error = %e, line = %line, "skipping line"),
                },
                ReadEvent::Undecodable(e) => {
                    warn!(collector = self.name, error = %e, "skipping undecodable line")
                }
                ReadEvent::End => {
                    match self.parser.finish() {
                        Ok(Some(metrics)) => self.append(metrics),
                        Ok(None) => {}
                        Err(e) => warn!(collector = self.name, error = %e, "dropping incomplete cycle"),
                    }

                    let Some(interval) = self.parser.poll_interval() else {
                        return Ok(Termination::EndOfStream);
                    };
                    if !self.stop.sleep(interval) {
                        return Ok(Termination::Stopped);
                    }
                    self.parser.reset();
                    *source = self.runner.open(&self.command)?;
                }
            }
        }
    }

    fn append(&mut self, metrics: Metrics) {
        let sample = Sample::now(metrics);
        debug!(
            collector = self.name,
            timestamp = %sample.timestamp_string(),
            metrics = %sample.metrics,
            "sample"
        );
        self.series.append(sample);
        self.appended += 1;
        if self.appended.is_multiple_of(PROGRESS_EVERY) {
            info!(collector = self.name, samples = self.appended, "collecting");
        }
    }
}
