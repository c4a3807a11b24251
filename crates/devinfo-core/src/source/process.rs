//! Line source backed by a real child process.

use std::io::{self, BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::{CommandRunner, CommandSpec, LineSource, ReadEvent, SourceError, decode_line};

/// Spawns commands with `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    type Source = ProcessSource;

    fn open(&self, command: &CommandSpec) -> Result<ProcessSource, SourceError> {
        ProcessSource::spawn(command)
    }
}

/// Standard output of a running child, read line by line.
///
/// The error stream is drained by a helper thread; the first non-blank line
/// it sees is surfaced as [`SourceError::Diagnostic`] on the next read.
/// Dropping the source before the stream ends kills the child.
pub struct ProcessSource {
    command: String,
    child: Child,
    stdout: BufReader<ChildStdout>,
    diagnostics: Receiver<String>,
    stderr_reader: Option<JoinHandle<()>>,
    finished: bool,
}

impl ProcessSource {
    pub fn spawn(spec: &CommandSpec) -> Result<Self, SourceError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group: a terminal Ctrl-C goes to us, not to the child.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| SourceError::spawn(spec, e))?;
        let command = spec.to_string();
        debug!(command = %command, pid = child.id(), "command spawned");

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::other("child output streams were not captured").into());
            }
        };

        let (tx, diagnostics) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("devinfo-stderr".to_string())
            .spawn(move || {
                for chunk in BufReader::new(stderr).split(b'\n') {
                    let Ok(bytes) = chunk else { break };
                    let text = String::from_utf8_lossy(&bytes).trim().to_string();
                    if !text.is_empty() && tx.send(text).is_err() {
                        break;
                    }
                }
            });
        let stderr_reader = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        Ok(Self {
            command,
            child,
            stdout: BufReader::new(stdout),
            diagnostics,
            stderr_reader: Some(stderr_reader),
            finished: false,
        })
    }

    fn check_diagnostics(&self) -> Result<(), SourceError> {
        match self.diagnostics.try_recv() {
            Ok(message) => Err(SourceError::Diagnostic {
                command: self.command.clone(),
                message,
            }),
            Err(_) => Ok(()),
        }
    }
}

impl LineSource for ProcessSource {
    fn read_line(&mut self) -> Result<ReadEvent, SourceError> {
        if self.finished {
            return Ok(ReadEvent::End);
        }
        self.check_diagnostics()?;

        let mut raw = Vec::new();
        if self.stdout.read_until(b'\n', &mut raw)? > 0 {
            return Ok(decode_line(raw));
        }

        // Output closed. Let the stderr reader drain so a message printed
        // right before exit is not mistaken for a clean end.
        if let Some(handle) = self.stderr_reader.take()
            && handle.join().is_err()
        {
            warn!(command = %self.command, "stderr reader panicked");
        }
        self.check_diagnostics()?;

        let status = self.child.wait()?;
        debug!(command = %self.command, %status, "command exited");
        self.finished = true;
        Ok(ReadEvent::End)
    }
}

impl Drop for ProcessSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    fn read_all(source: &mut ProcessSource) -> Result<Vec<String>, SourceError> {
        let mut lines = Vec::new();
        loop {
            match source.read_line()? {
                ReadEvent::Line(l) => lines.push(l),
                ReadEvent::Undecodable(_) => lines.push("<undecodable>".to_string()),
                ReadEvent::End => return Ok(lines),
            }
        }
    }

    #[test]
    fn test_reads_lines_until_end() {
        let mut source = ProcessRunner.open(&sh("printf 'one\\ntwo\\nthree'")).unwrap();
        assert_eq!(read_all(&mut source).unwrap(), vec!["one", "two", "three"]);
        // End is sticky.
        assert!(matches!(source.read_line().unwrap(), ReadEvent::End));
    }

    #[test]
    fn test_undecodable_line_is_skippable() {
        let mut source = ProcessRunner.open(&sh("printf '\\377\\376\\nok\\n'")).unwrap();
        assert_eq!(read_all(&mut source).unwrap(), vec!["<undecodable>", "ok"]);
    }

    #[test]
    fn test_stderr_output_is_fatal() {
        let mut source = ProcessRunner
            .open(&sh("echo 'error: no devices/emulators found' >&2"))
            .unwrap();
        match read_all(&mut source) {
            Err(SourceError::Diagnostic { message, .. }) => {
                assert_eq!(message, "error: no devices/emulators found")
            }
            other => panic!("expected diagnostic, got {:?}", other),
        }
    }

    #[test]
    fn test_stderr_mid_stream_is_fatal() {
        let mut source = ProcessRunner
            .open(&sh("echo first; echo oops >&2; sleep 0.2; echo second"))
            .unwrap();
        let err = read_all(&mut source).unwrap_err();
        assert!(matches!(err, SourceError::Diagnostic { ref message, .. } if message == "oops"));
    }

    #[test]
    fn test_missing_binary_is_spawn_failure() {
        let spec = CommandSpec::new("/nonexistent/devinfo-test-binary");
        match ProcessRunner.open(&spec) {
            Err(e) => assert!(e.is_spawn()),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[test]
    fn test_drop_kills_long_running_child() {
        let mut source = ProcessRunner.open(&sh("echo ready; sleep 30")).unwrap();
        assert!(matches!(source.read_line().unwrap(), ReadEvent::Line(ref l) if l == "ready"));

        let started = Instant::now();
        drop(source);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
