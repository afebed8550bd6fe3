//! Command-line configuration and the startup toolchain probe.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::debug;

use crate::pipeline::process::{run_process, NullSink, ProcessParameters};
use crate::pipeline::PipelineConfig;

/// Default per-step deadline in seconds (one hour). `0` disables the
/// deadline and reproduces the reference's wait-forever behavior.
const DEFAULT_STEP_DEADLINE_SECS: u64 = 3600;

/// Webhook-triggered build orchestrator.
///
/// Listens for push notifications, coalesces bursts into a single pending
/// build, and drives a git clone / cmake configure / build / test pipeline
/// off the request-handling thread.
#[derive(Debug, Parser)]
#[command(name = "buildserver", version, about)]
pub struct Options {
    /// URI for git-cloning the code.
    #[arg(short, long)]
    pub repository: String,

    /// Port to listen on for push notifications.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// String that must appear in the notify path for the notification to
    /// be accepted.
    #[arg(short, long)]
    pub secret: String,

    /// Directory the pipeline may wipe and rebuild on every run.
    #[arg(short, long)]
    pub workspace: PathBuf,

    /// Named build steps; repeatable. Defaults to a single step named
    /// after the repository.
    #[arg(long = "step")]
    pub steps: Vec<String>,

    /// CMake cache definitions as KEY=VALUE; repeatable.
    #[arg(long = "define", value_parser = parse_define)]
    pub defines: Vec<(String, String)>,

    /// Git executable to use.
    #[arg(long, default_value = "git")]
    pub git: PathBuf,

    /// CMake executable to use.
    #[arg(long, default_value = "cmake")]
    pub cmake: PathBuf,

    /// Per-pipeline-step deadline in seconds; 0 disables the deadline.
    #[arg(long, default_value_t = DEFAULT_STEP_DEADLINE_SECS)]
    pub step_deadline_secs: u64,
}

/// Parses a `KEY=VALUE` cmake definition.
fn parse_define(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

impl Options {
    /// The configured step names, defaulting to one step named after the
    /// last path component of the repository URI.
    pub fn step_names(&self) -> Vec<String> {
        if !self.steps.is_empty() {
            return self.steps.clone();
        }
        let derived = self
            .repository
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|name| name.trim_end_matches(".git"))
            .filter(|name| !name.is_empty())
            .unwrap_or("default")
            .to_string();
        vec![derived]
    }

    /// The deadline applied to each external pipeline step.
    pub fn step_deadline(&self) -> Option<Duration> {
        match self.step_deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Builds the pipeline configuration for one step.
    ///
    /// Each step gets its own workspace subdirectory so overlapping runs
    /// of different steps cannot stomp on each other.
    pub fn pipeline_config(&self, step_name: &str) -> PipelineConfig {
        PipelineConfig {
            repository: self.repository.clone(),
            workspace: self.workspace.join(step_name),
            git_executable: self.git.clone(),
            cmake_executable: self.cmake.clone(),
            cmake_defines: self.defines.clone(),
            step_deadline: self.step_deadline(),
        }
    }
}

/// A required tool failed its startup probe.
#[derive(Debug, Error)]
#[error("required tool {tool} is not usable: {reason}")]
pub struct MissingDependency {
    pub tool: String,
    pub reason: String,
}

/// Verifies that a configured tool can be spawned at all by running
/// `<tool> --version`. Failures here are fatal at startup.
pub fn probe_tool(executable: &std::path::Path) -> Result<(), MissingDependency> {
    let cwd = std::env::temp_dir();
    let parameters = ProcessParameters::new(executable, cwd).arg("--version");
    let mut sink = NullSink;
    match run_process(&parameters, &mut sink, Some(Duration::from_secs(30))) {
        Ok(status) if status.success() => {
            debug!(tool = %executable.display(), "toolchain probe ok");
            Ok(())
        }
        Ok(status) => Err(MissingDependency {
            tool: executable.display().to_string(),
            reason: format!("--version exited with {:?}", status.code()),
        }),
        Err(error) => Err(MissingDependency {
            tool: executable.display().to_string(),
            reason: error.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> Options {
        let mut argv = vec!["buildserver"];
        argv.extend_from_slice(args);
        Options::parse_from(argv)
    }

    fn base_args() -> Vec<&'static str> {
        vec![
            "--repository",
            "https://example.com/team/widget.git",
            "--secret",
            "abc123",
            "--workspace",
            "/tmp/ws",
        ]
    }

    #[test]
    fn step_name_derives_from_repository() {
        let options = options(&base_args());
        assert_eq!(options.step_names(), vec!["widget"]);
    }

    #[test]
    fn explicit_steps_override_the_default() {
        let mut args = base_args();
        args.extend(["--step", "debug", "--step", "release"]);
        let options = options(&args);
        assert_eq!(options.step_names(), vec!["debug", "release"]);
    }

    #[test]
    fn defines_parse_as_key_value() {
        let mut args = base_args();
        args.extend(["--define", "CMAKE_BUILD_TYPE=Release"]);
        let options = options(&args);
        assert_eq!(
            options.defines,
            vec![("CMAKE_BUILD_TYPE".to_string(), "Release".to_string())]
        );
    }

    #[test]
    fn invalid_define_is_rejected() {
        assert!(parse_define("NOEQUALS").is_err());
        assert!(parse_define("=value").is_err());
    }

    #[test]
    fn zero_deadline_disables_it() {
        let mut args = base_args();
        args.extend(["--step-deadline-secs", "0"]);
        assert_eq!(options(&args).step_deadline(), None);
    }

    #[test]
    fn per_step_workspaces_are_disjoint() {
        let mut args = base_args();
        args.extend(["--step", "a", "--step", "b"]);
        let options = options(&args);
        let a = options.pipeline_config("a");
        let b = options.pipeline_config("b");
        assert_ne!(a.workspace, b.workspace);
    }

    #[test]
    fn probe_rejects_a_missing_tool() {
        let error = probe_tool(std::path::Path::new("no-such-tool-c41d")).unwrap_err();
        assert!(error.to_string().contains("no-such-tool-c41d"));
    }

    #[cfg(unix)]
    #[test]
    fn probe_accepts_a_working_tool() {
        // `true` ignores --version and exits 0.
        probe_tool(std::path::Path::new("true")).unwrap();
    }
}
