//! The build pipeline: clone, configure, compile, test.
//!
//! [`run_pipeline`] executes the whole sequence synchronously and is meant
//! to be offloaded to a worker thread (`spawn_blocking`); it owns the
//! workspace directory for the duration of one run and communicates with
//! the reactor only through its return value.
//!
//! Step order:
//!
//! 1. wipe and recreate the workspace
//! 2. `git clone <repository> <workspace>/source.git`
//! 3. create `<workspace>/build`
//! 4. `cmake <source> [-Dkey=value ...]` (cwd = build dir)
//! 5. `cmake --build . [-- -j <parallelism>]` (`-j` only on POSIX)
//! 6. run `<build>/test/unit_test`; exit 0 is success
//!
//! Any failing step aborts the rest. A tool that cannot be spawned at all
//! is reported as [`PipelineOutcome::MissingDependency`] rather than a
//! plain failure, preserving the distinction at the pipeline boundary.

pub mod process;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use process::{run_process, OutputSink, ProcessError, ProcessParameters};

/// Name of the clone directory inside the workspace.
const SOURCE_DIR: &str = "source.git";
/// Name of the cmake build directory inside the workspace.
const BUILD_DIR: &str = "build";
/// Location of the produced test binary, relative to the build directory.
const TEST_BINARY: &str = "test/unit_test";

/// Errors internal to one pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An external step exited non-zero.
    #[error("{command} exited with {code:?}")]
    StepFailed { command: String, code: Option<i32> },

    /// Spawning or supervising a child failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Workspace preparation failed.
    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

/// The overall result of one pipeline run, as delivered to the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every step succeeded and the test binary exited 0.
    Success,
    /// A step failed, the test binary exited non-zero, or the run was
    /// aborted (deadline, IO error, panic).
    Failure,
    /// A required tool (git or cmake) could not be spawned.
    MissingDependency,
}

/// Configuration for one step's pipeline runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// URI passed to `git clone`.
    pub repository: String,

    /// Directory exclusively owned by the pipeline while it runs; wiped
    /// and recreated at the start of every run.
    pub workspace: PathBuf,

    /// Git executable (name or path).
    pub git_executable: PathBuf,

    /// CMake executable (name or path).
    pub cmake_executable: PathBuf,

    /// `-D` definitions forwarded to the cmake configure step.
    pub cmake_defines: Vec<(String, String)>,

    /// Per-step deadline. `None` reproduces the reference behavior of
    /// waiting forever on a hung tool.
    pub step_deadline: Option<Duration>,
}

impl PipelineConfig {
    fn source_dir(&self) -> PathBuf {
        self.workspace.join(SOURCE_DIR)
    }

    fn build_dir(&self) -> PathBuf {
        self.workspace.join(BUILD_DIR)
    }
}

/// Runs the full pipeline, mapping every abnormal end to an outcome.
///
/// Blocking; call from a worker thread, not from the reactor.
pub fn run_pipeline(config: &PipelineConfig, output: &mut dyn OutputSink) -> PipelineOutcome {
    match run_pipeline_inner(config, output) {
        Ok(outcome) => outcome,
        Err(PipelineError::Process(ProcessError::MissingTool { tool })) => {
            warn!(tool = %tool, "pipeline aborted: required tool not found");
            PipelineOutcome::MissingDependency
        }
        Err(error) => {
            warn!(error = %error, "pipeline failed");
            PipelineOutcome::Failure
        }
    }
}

fn run_pipeline_inner(
    config: &PipelineConfig,
    output: &mut dyn OutputSink,
) -> Result<PipelineOutcome, PipelineError> {
    prepare_workspace(config)?;
    git_clone(config, output)?;
    std::fs::create_dir_all(config.build_dir())?;
    cmake_generate(config, output)?;
    cmake_build(config, output)?;
    run_test(config, output)
}

/// Wipes and recreates the workspace so no state leaks between runs.
fn prepare_workspace(config: &PipelineConfig) -> Result<(), PipelineError> {
    debug!(workspace = %config.workspace.display(), "preparing workspace");
    match std::fs::remove_dir_all(&config.workspace) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => return Err(error.into()),
    }
    std::fs::create_dir_all(&config.workspace)?;
    Ok(())
}

/// Runs one step and turns a non-zero exit into `StepFailed`.
fn run_step(
    parameters: &ProcessParameters,
    config: &PipelineConfig,
    output: &mut dyn OutputSink,
) -> Result<(), PipelineError> {
    debug!(command = %parameters.command_line(), "running pipeline step");
    let status = run_process(parameters, output, config.step_deadline)?;
    if status.success() {
        Ok(())
    } else {
        Err(PipelineError::StepFailed {
            command: parameters.command_line(),
            code: status.code(),
        })
    }
}

fn git_clone(config: &PipelineConfig, output: &mut dyn OutputSink) -> Result<(), PipelineError> {
    let parameters = ProcessParameters::new(&config.git_executable, &config.workspace)
        .arg("clone")
        .arg(&config.repository)
        .arg(config.source_dir().display().to_string());
    run_step(&parameters, config, output)
}

fn cmake_generate(
    config: &PipelineConfig,
    output: &mut dyn OutputSink,
) -> Result<(), PipelineError> {
    let mut parameters = ProcessParameters::new(&config.cmake_executable, config.build_dir())
        .arg(config.source_dir().display().to_string());
    for (key, value) in &config.cmake_defines {
        parameters = parameters.arg(format!("-D{key}={value}"));
    }
    run_step(&parameters, config, output)
}

fn cmake_build(config: &PipelineConfig, output: &mut dyn OutputSink) -> Result<(), PipelineError> {
    let mut parameters = ProcessParameters::new(&config.cmake_executable, config.build_dir())
        .arg("--build")
        .arg(".");
    // Parallel build flag is passed to the underlying make; POSIX only.
    #[cfg(unix)]
    {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        parameters = parameters.arg("--").arg("-j").arg(parallelism.to_string());
    }
    run_step(&parameters, config, output)
}

/// Runs the produced test binary; its exit code decides the outcome.
fn run_test(
    config: &PipelineConfig,
    output: &mut dyn OutputSink,
) -> Result<PipelineOutcome, PipelineError> {
    let test_exe = config.build_dir().join(TEST_BINARY);
    let test_dir = test_exe
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.build_dir());
    let parameters = ProcessParameters::new(&test_exe, test_dir);
    debug!(command = %parameters.command_line(), "running tests");

    let status = match run_process(&parameters, output, config.step_deadline) {
        Ok(status) => status,
        // A missing test binary means the build did not produce one;
        // that is a build failure, not a missing toolchain dependency.
        Err(ProcessError::MissingTool { .. }) => return Ok(PipelineOutcome::Failure),
        Err(error) => return Err(error.into()),
    };

    if status.success() {
        Ok(PipelineOutcome::Success)
    } else {
        Ok(PipelineOutcome::Failure)
    }
}
