//! Child process execution with output capture and an optional wall-clock timeout.

use std::collections::BTreeMap;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A program, its arguments, and environment overrides (`None` removes a variable).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, Option<String>>,
    pub discard_output: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), Some(value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env.insert(key.into(), None);
        self
    }

    /// Sends stdout/stderr to the null device; the sample text stays empty.
    pub fn discard_output(mut self) -> Self {
        self.discard_output = true;
        self
    }

    /// Runs this command under `wrapper wrapper_args... program args...`.
    pub fn wrapped(self, wrapper: &str, wrapper_args: &[&str]) -> Self {
        let mut args: Vec<String> = wrapper_args.iter().map(|a| (*a).to_string()).collect();
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: wrapper.to_string(),
            args,
            env: self.env,
            discard_output: self.discard_output,
        }
    }

    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// One execution attempt.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
    pub elapsed: Duration,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Set when the program could not be started at all.
    pub spawn_error: Option<String>,
}

impl Sample {
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') && !self.stderr.is_empty() {
            out.push('\n');
        }
        out.push_str(&self.stderr);
        out
    }

    pub fn failure_reason(&self) -> String {
        if let Some(err) = &self.spawn_error {
            return format!("could not start: {err}");
        }
        if self.timed_out {
            return format!("timed out after {:.3}s", self.elapsed.as_secs_f64());
        }
        match self.exit_code {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Executes commands. Implementations must never panic on a bad command;
/// anything that prevents a clean zero exit is a failed [`Sample`].
pub trait CommandRunner {
    fn run(&mut self, command: &CommandSpec, timeout: Option<Duration>) -> Sample;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&mut self, command: &CommandSpec, timeout: Option<Duration>) -> Sample {
        let start = Instant::now();
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).stdin(Stdio::null());
        for (key, value) in &command.env {
            match value {
                Some(v) => {
                    cmd.env(key, v);
                }
                None => {
                    cmd.env_remove(key);
                }
            }
        }
        if command.discard_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::debug!("failed to spawn {}: {err}", command.display());
                return Sample {
                    elapsed: start.elapsed(),
                    spawn_error: Some(err.to_string()),
                    ..Sample::default()
                };
            }
        };

        let deadline = timeout.and_then(|limit| start.checked_add(limit));
        let (tx, rx) = mpsc::channel();
        let mut readers = 0;
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(pipe, Stream::Stdout, tx.clone());
            readers += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_reader(pipe, Stream::Stderr, tx.clone());
            readers += 1;
        }
        drop(tx);

        let (status, timed_out) = match wait_until(&mut child, deadline) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!("failed waiting on {}: {err}", command.display());
                let _ = child.kill();
                let _ = child.wait();
                return Sample {
                    elapsed: start.elapsed(),
                    spawn_error: Some(err.to_string()),
                    ..Sample::default()
                };
            }
        };

        // Grandchildren may still hold the pipes open, so draining shares the deadline
        // and readers still blocked past it are abandoned.
        let drained = if timed_out {
            None
        } else {
            drain_readers(&rx, readers, deadline)
        };
        let elapsed = start.elapsed();
        let Some((stdout, stderr)) = drained else {
            tracing::debug!("{} timed out after {elapsed:?}", command.display());
            return Sample {
                succeeded: false,
                elapsed,
                exit_code: status.code(),
                timed_out: true,
                ..Sample::default()
            };
        };

        Sample {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            succeeded: status.success(),
            elapsed,
            exit_code: status.code(),
            timed_out: false,
            spawn_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    stream: Stream,
    tx: Sender<(Stream, Vec<u8>)>,
) {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut buf) {
            tracing::debug!("pipe read failed: {err}");
        }
        let _ = tx.send((stream, buf));
    });
}

/// Collects every reader's output, or `None` once `deadline` passes first.
fn drain_readers(
    rx: &Receiver<(Stream, Vec<u8>)>,
    readers: usize,
    deadline: Option<Instant>,
) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    for _ in 0..readers {
        let received = match deadline {
            Some(d) => rx.recv_timeout(d.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok((Stream::Stdout, bytes)) => stdout = bytes,
            Ok((Stream::Stderr, bytes)) => stderr = bytes,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Some((stdout, stderr))
}

fn wait_until(
    child: &mut Child,
    deadline: Option<Instant>,
) -> std::io::Result<(ExitStatus, bool)> {
    let Some(deadline) = deadline else {
        return child.wait().map(|status| (status, false));
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let status = child.wait()?;
            return Ok((status, true));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
