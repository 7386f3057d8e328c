//! Runs a resource reaper that listens for filter submissions from
//! test-harness clients and prunes the matching containers, networks,
//! volumes, and images once the test session ends.

use clap::Parser;
use reaper_core::Config;
use reaper_runtime::DockerRuntime;
use reaper_server::{Reaper, ReaperError};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "reaper-daemon")]
#[command(version, about = "Resource reaper for a local container runtime")]
struct Args {
    /// Port to listen on; the RYUK_PORT environment variable wins.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match Config::load_with_port(args.port) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("reaper-daemon: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(cfg.verbose);

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_fatal() => {
            error!(error = %err, "run");
            ExitCode::FAILURE
        }
        Err(err) => {
            // Cleanup was best effort; report what was left and exit
            // cleanly.
            error!(error = %err, "prune incomplete");
            ExitCode::SUCCESS
        }
    }
}

async fn run(cfg: Config) -> Result<(), ReaperError> {
    let client = Arc::new(DockerRuntime::from_env()?);
    let reaper = Reaper::new(cfg, client).await?;

    let signal_token = CancellationToken::new();
    tokio::spawn({
        let signal_token = signal_token.clone();
        async move {
            shutdown_signal().await;
            signal_token.cancel();
        }
    });

    reaper.run(signal_token).await
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
