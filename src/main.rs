use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use buildserver::config::{probe_tool, Options};
use buildserver::notify::SaturatingNotifier;
use buildserver::registry::shared_registry;
use buildserver::server::{make_root_handler, serve};
use buildserver::trigger::{pipeline_runner, run_build_loop};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buildserver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = Options::parse();

    // Missing toolchain is the one fatal startup condition.
    for tool in [&options.git, &options.cmake] {
        if let Err(missing) = probe_tool(tool) {
            error!("{missing}");
            return ExitCode::FAILURE;
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(error = %error, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let local = tokio::task::LocalSet::new();
    match local.block_on(&runtime, run(options)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %error, "server error");
            ExitCode::FAILURE
        }
    }
}

/// Wires registry, notifiers, trigger loops and the accept loop together
/// on the reactor, then serves until ctrl-c.
async fn run(options: Options) -> std::io::Result<()> {
    let step_names = options.step_names();
    let registry = shared_registry(step_names.iter().cloned());

    // One coalescing slot per step; the notify route fans out to all of
    // them, and each trigger loop waits on its own.
    let mut notifiers = Vec::with_capacity(step_names.len());
    for step_name in &step_names {
        let notifier = SaturatingNotifier::new();
        notifiers.push(notifier.clone());
        tokio::task::spawn_local(run_build_loop(
            step_name.clone(),
            notifier,
            registry.clone(),
            pipeline_runner(options.pipeline_config(step_name)),
        ));
    }

    let root = make_root_handler(options.secret.clone(), notifiers, registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], options.port));
    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        steps = step_names.len(),
        repository = %options.repository,
        "buildserver ready"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::task::spawn_local(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            signal_token.cancel();
        }
    });

    serve(listener, root, shutdown).await;
    Ok(())
}
