//! Line sources over an external command.
//!
//! A [`CommandRunner`] spawns a [`CommandSpec`] and hands back a
//! [`LineSource`] that yields the command's standard output one decoded line
//! at a time. Anything written to the error stream is a fatal
//! [`SourceError::Diagnostic`].
//!
//! ```text
//!   CommandRunner ──open()──► LineSource ──read_line()──► ReadEvent
//!        │                                                 ├─ Line(String)
//!        ├─ ProcessRunner  (std::process)                  ├─ Undecodable(..)
//!        └─ ScriptedRunner (tests)                         └─ End
//! ```

pub mod mock;
mod process;

use std::fmt;
use std::io;
use std::string::FromUtf8Error;
use std::sync::Arc;

pub use mock::ScriptedRunner;
pub use process::{ProcessRunner, ProcessSource};

/// Program and arguments of an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Splits a `--shell` value into words and inserts `-s <serial>` after
    /// the program. An empty shell stays empty and ignores the serial.
    pub fn shell_prefix(shell: &str, serial: Option<&str>) -> Vec<String> {
        let mut prefix: Vec<String> = shell.split_whitespace().map(str::to_string).collect();
        if let Some(serial) = serial
            && !prefix.is_empty()
        {
            prefix.splice(1..1, ["-s".to_string(), serial.to_string()]);
        }
        prefix
    }

    /// Builds `<shell prefix...> <remote command...>`.
    ///
    /// An empty prefix runs the remote command directly on this host.
    pub fn through_shell(prefix: &[String], remote: &[&str]) -> Self {
        let mut parts = prefix
            .iter()
            .cloned()
            .chain(remote.iter().map(|s| s.to_string()));
        Self {
            program: parts.next().unwrap_or_default(),
            args: parts.collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Outcome of one blocking read.
#[derive(Debug)]
pub enum ReadEvent {
    /// One line of output, without its terminator.
    Line(String),
    /// A line that was not valid UTF-8. Reading may continue.
    Undecodable(FromUtf8Error),
    /// The command closed its output and exited.
    End,
}

/// Fatal line source failures.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// The command could not be started.
    Spawn {
        command: String,
        source: Arc<io::Error>,
    },
    /// The command wrote to its error stream.
    Diagnostic { command: String, message: String },
    /// Reading the output pipe failed.
    Io(Arc<io::Error>),
}

impl SourceError {
    pub fn spawn(command: &CommandSpec, source: io::Error) -> Self {
        SourceError::Spawn {
            command: command.to_string(),
            source: Arc::new(source),
        }
    }

    pub fn is_spawn(&self) -> bool {
        matches!(self, SourceError::Spawn { .. })
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Spawn { command, source } => {
                write!(f, "failed to spawn '{}': {}", command, source)
            }
            SourceError::Diagnostic { command, message } => {
                write!(f, "'{}' reported: {}", command, message)
            }
            SourceError::Io(e) => write!(f, "I/O error reading command output: {}", e),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Spawn { source, .. } => Some(source.as_ref()),
            SourceError::Io(e) => Some(e.as_ref()),
            SourceError::Diagnostic { .. } => None,
        }
    }
}

impl From<io::Error> for SourceError {
    fn from(e: io::Error) -> Self {
        SourceError::Io(Arc::new(e))
    }
}

/// A blocking stream of decoded lines.
pub trait LineSource: Send {
    /// Blocks until a line is available or the stream ends.
    fn read_line(&mut self) -> Result<ReadEvent, SourceError>;
}

/// Starts commands and returns their line sources.
pub trait CommandRunner: Send + Sync + 'static {
    type Source: LineSource + 'static;

    fn open(&self, command: &CommandSpec) -> Result<Self::Source, SourceError>;
}

/// Splits a raw line into text, trimming the `\n` / `\r\n` terminator.
pub(crate) fn decode_line(mut raw: Vec<u8>) -> ReadEvent {
    while matches!(raw.last(), Some(b'\n' | b'\r')) {
        raw.pop();
    }
    match String::from_utf8(raw) {
        Ok(line) => ReadEvent::Line(line),
        Err(e) => ReadEvent::Undecodable(e),
    }
}
