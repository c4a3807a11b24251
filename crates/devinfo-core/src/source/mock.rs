//! Scripted command runner for testing without a device.
//!
//! Each call to [`CommandRunner::open`] consumes the next [`Script`] in the
//! queue. When the queue is empty the runner either replays a repeating
//! script or fails to spawn, which ends a polling collector.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::{CommandRunner, CommandSpec, LineSource, ReadEvent, SourceError, decode_line};

/// Output of one scripted command invocation.
#[derive(Debug, Clone, Default)]
pub struct Script {
    lines: Vec<Vec<u8>>,
    diagnostic: Option<String>,
    line_delay: Duration,
    spawn_error: Option<io::ErrorKind>,
}

impl Script {
    /// A run that prints `lines` and exits cleanly.
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            lines: lines
                .into_iter()
                .map(|l| l.as_ref().as_bytes().to_vec())
                .collect(),
            ..Self::default()
        }
    }

    /// A run that cannot be started.
    pub fn spawn_failure(kind: io::ErrorKind) -> Self {
        Self {
            spawn_error: Some(kind),
            ..Self::default()
        }
    }

    /// Appends a raw (possibly non-UTF-8) line.
    pub fn raw_line(mut self, bytes: &[u8]) -> Self {
        self.lines.push(bytes.to_vec());
        self
    }

    /// Appends a text line.
    pub fn line(mut self, line: &str) -> Self {
        self.lines.push(line.as_bytes().to_vec());
        self
    }

    /// After the lines, report `message` on the error stream.
    pub fn then_diagnostic(mut self, message: impl Into<String>) -> Self {
        self.diagnostic = Some(message.into());
        self
    }

    /// Sleep before every read, like a command emitting once per interval.
    pub fn line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }
}

/// In-memory [`CommandRunner`] fed from a queue of scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    runs: Arc<Mutex<VecDeque<Script>>>,
    repeat: Option<Script>,
    opened: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a script for the next unclaimed `open()`.
    pub fn with(self, script: Script) -> Self {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
        self
    }

    /// Replays `script` once the queue is exhausted.
    pub fn repeating(mut self, script: Script) -> Self {
        self.repeat = Some(script);
        self
    }

    /// How many times `open()` has been called, including failed spawns.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl CommandRunner for ScriptedRunner {
    type Source = ScriptedSource;

    fn open(&self, command: &CommandSpec) -> Result<ScriptedSource, SourceError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let next = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let script = match next.or_else(|| self.repeat.clone()) {
            Some(script) => script,
            None => {
                return Err(SourceError::spawn(
                    command,
                    io::Error::new(io::ErrorKind::NotFound, "no scripted run left"),
                ));
            }
        };

        if let Some(kind) = script.spawn_error {
            return Err(SourceError::spawn(command, io::Error::from(kind)));
        }

        Ok(ScriptedSource {
            command: command.to_string(),
            lines: script.lines.into(),
            diagnostic: script.diagnostic,
            line_delay: script.line_delay,
        })
    }
}

/// Line source replaying one [`Script`].
#[derive(Debug)]
pub struct ScriptedSource {
    command: String,
    lines: VecDeque<Vec<u8>>,
    diagnostic: Option<String>,
    line_delay: Duration,
}

impl LineSource for ScriptedSource {
    fn read_line(&mut self) -> Result<ReadEvent, SourceError> {
        if !self.line_delay.is_zero() {
            thread::sleep(self.line_delay);
        }

        if let Some(raw) = self.lines.pop_front() {
            return Ok(decode_line(raw));
        }

        match self.diagnostic.take() {
            Some(message) => Err(SourceError::Diagnostic {
                command: self.command.clone(),
                message,
            }),
            None => Ok(ReadEvent::End),
        }
    }
}
