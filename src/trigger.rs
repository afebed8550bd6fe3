//! The long-lived build-trigger task.
//!
//! One trigger loop runs per configured step, on the reactor thread. It
//! waits on the step's [`SaturatingNotifier`], marks the step as building,
//! offloads the blocking pipeline to the blocking pool and suspends until
//! the result is marshalled back, then updates the registry and
//! re-subscribes. The registry is only ever touched here (and by the
//! status page, read-only), always on the reactor thread.
//!
//! Because the notifier coalesces, any number of webhooks arriving during
//! a build produce exactly one follow-up build.

use tracing::{error, info, warn};

use crate::notify::SaturatingNotifier;
use crate::pipeline::process::ConsoleSink;
use crate::pipeline::{run_pipeline, PipelineConfig, PipelineOutcome};
use crate::registry::{BuildOutcome, SharedRegistry};

/// Runs the trigger loop for one step until the notifier's tasks are torn
/// down with the reactor.
///
/// The pipeline runner is a closure seam so tests can drive the loop
/// without a real toolchain; [`pipeline_runner`] produces the production
/// closure.
pub async fn run_build_loop<R>(
    step_name: String,
    notifier: SaturatingNotifier,
    registry: SharedRegistry,
    runner: R,
) where
    R: Fn() -> PipelineOutcome + Clone + Send + 'static,
{
    loop {
        notifier.subscribed().await;
        info!(step = %step_name, "received a build notification");

        registry.borrow_mut().set_building(&step_name, true);

        // The JoinHandle is the one-shot completion channel: the worker
        // thread never touches reactor-owned state directly.
        let runner = runner.clone();
        let outcome = match tokio::task::spawn_blocking(runner).await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                // A panic on the worker thread is recorded as a failed
                // build; the service keeps serving.
                error!(step = %step_name, error = %join_error, "build worker panicked");
                PipelineOutcome::Failure
            }
        };

        let recorded = match outcome {
            PipelineOutcome::Success => {
                info!(step = %step_name, "build succeeded");
                BuildOutcome::Success
            }
            PipelineOutcome::Failure => {
                warn!(step = %step_name, "build failed");
                BuildOutcome::Failure
            }
            PipelineOutcome::MissingDependency => {
                warn!(step = %step_name, "build failed: missing toolchain dependency");
                BuildOutcome::Failure
            }
        };

        let mut registry = registry.borrow_mut();
        registry.record_result(&step_name, recorded);
        registry.set_building(&step_name, false);
    }
}

/// The production pipeline runner: executes [`run_pipeline`] with child
/// output forwarded to the console.
pub fn pipeline_runner(config: PipelineConfig) -> impl Fn() -> PipelineOutcome + Clone + Send {
    move || {
        let mut sink = ConsoleSink;
        run_pipeline(&config, &mut sink)
    }
}
