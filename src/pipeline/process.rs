//! External process execution for the build pipeline.
//!
//! Every pipeline step is a child process spawned with an explicit
//! working directory and argument list. Stdout and stderr are streamed
//! into a caller-supplied [`OutputSink`], the exit code is inspected by
//! the caller, and an optional deadline kills children that hang.
//!
//! All of this is blocking and runs on the worker thread that executes
//! the pipeline, never on the reactor.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

/// How often a deadline-bounded wait polls the child for exit.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from spawning or supervising an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable could not be found.
    #[error("required tool not found: {tool}")]
    MissingTool { tool: String },

    /// The child outlived its deadline and was killed.
    #[error("{command} did not finish within {after:?}")]
    TimedOut { command: String, after: Duration },

    /// IO error while spawning or supervising the child.
    #[error("IO error running {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for process execution.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// What to run: executable, arguments and working directory.
#[derive(Debug, Clone)]
pub struct ProcessParameters {
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub working_directory: PathBuf,
}

impl ProcessParameters {
    pub fn new(executable: impl Into<PathBuf>, working_directory: impl Into<PathBuf>) -> Self {
        ProcessParameters {
            executable: executable.into(),
            arguments: Vec::new(),
            working_directory: working_directory.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Human-readable command line for error messages and logs.
    pub fn command_line(&self) -> String {
        let mut line = self.executable.display().to_string();
        for arg in &self.arguments {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Destination for a child's combined stdout and stderr.
///
/// Sinks must be `Send`: the two pipes are drained on scoped threads so
/// that a child producing lots of output cannot deadlock against the
/// exit-polling loop.
pub trait OutputSink: Send {
    fn write_chunk(&mut self, chunk: &[u8]);
}

/// Forwards child output to this process's stderr.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn write_chunk(&mut self, chunk: &[u8]) {
        eprint!("{}", String::from_utf8_lossy(chunk));
    }
}

/// Accumulates child output in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    bytes: Vec<u8>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_string_lossy(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl OutputSink for BufferSink {
    fn write_chunk(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }
}

/// Discards child output.
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write_chunk(&mut self, _chunk: &[u8]) {}
}

/// Runs a child process to completion.
///
/// Stdin is null; stdout and stderr are piped into `sink` (interleaved in
/// arrival order). With a deadline, the child is polled for exit and
/// killed once the deadline passes. Returns the exit status; the caller
/// decides what a non-zero exit means.
pub fn run_process(
    parameters: &ProcessParameters,
    sink: &mut dyn OutputSink,
    deadline: Option<Duration>,
) -> ProcessResult<ExitStatus> {
    let command_line = parameters.command_line();

    let mut child = Command::new(&parameters.executable)
        .args(&parameters.arguments)
        .current_dir(&parameters.working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ProcessError::MissingTool {
                    tool: parameters.executable.display().to_string(),
                }
            } else {
                ProcessError::Io {
                    command: command_line.clone(),
                    source,
                }
            }
        })?;

    // Piped handles exist unless the child was configured otherwise.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let shared_sink = Mutex::new(sink);

    let wait_result = std::thread::scope(|scope| {
        if let Some(stdout) = stdout {
            scope.spawn(|| drain(stdout, &shared_sink));
        }
        if let Some(stderr) = stderr {
            scope.spawn(|| drain(stderr, &shared_sink));
        }
        wait_with_deadline(&mut child, &command_line, deadline)
    });

    wait_result
}

/// Copies a pipe into the shared sink until EOF.
fn drain(mut pipe: impl Read, sink: &Mutex<&mut dyn OutputSink>) {
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut sink) = sink.lock() {
                    sink.write_chunk(&chunk[..n]);
                }
            }
        }
    }
}

/// Waits for the child, killing it if the deadline passes.
fn wait_with_deadline(
    child: &mut std::process::Child,
    command_line: &str,
    deadline: Option<Duration>,
) -> ProcessResult<ExitStatus> {
    let io_error = |source| ProcessError::Io {
        command: command_line.to_string(),
        source,
    };

    let Some(deadline) = deadline else {
        return child.wait().map_err(io_error);
    };

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(io_error)? {
            return Ok(status);
        }
        if started.elapsed() >= deadline {
            // Best effort; the child may exit between try_wait and kill.
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::TimedOut {
                command: command_line.to_string(),
                after: deadline,
            });
        }
        std::thread::sleep(WAIT_POLL_INTERVAL);
    }
}
