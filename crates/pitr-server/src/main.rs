//! PITR - binlog collector and recoverer for Galera clusters
//!
//! Commands:
//! - `collect` (default) - archive closed binlogs every `COLLECT_SPAN_SEC`
//! - `recover` - replay archived binlogs onto a restored node
//!
//! Both serve GET /metrics and GET /health on `PITR_HTTP_ADDR`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pitr_core::{CollectorConfig, PitrMetrics, RecovererConfig};
use pitr_server::{ServerConfig, api, runner};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// PITR CLI arguments
#[derive(Parser, Debug)]
#[command(name = "pitr")]
#[command(about = "Binlog archiving and point-in-time recovery for Galera clusters", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(long, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Continuously archive binlogs (default)
    Collect,
    /// Replay archived binlogs up to PITR_RECOVERY_TYPE
    Recover,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "pitr_server=debug,pitr_core=debug,tower_http=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "pitr_server=info,pitr_core=info".into())
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = args.command.unwrap_or(Command::Collect);
    if let Err(e) = async_main(command).await {
        error!("{:#}", e);
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}

enum Job {
    Collect(CollectorConfig),
    Recover(RecovererConfig),
}

async fn async_main(command: Command) -> anyhow::Result<()> {
    let server_config = ServerConfig::from_env().context("load server config")?;
    let job = match command {
        Command::Collect => Job::Collect(CollectorConfig::from_env().context("load collector config")?),
        Command::Recover => Job::Recover(RecovererConfig::from_env().context("load recoverer config")?),
    };

    let metrics = Arc::new(PitrMetrics::new());
    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let listener = TcpListener::bind(server_config.addr)
        .await
        .with_context(|| format!("bind {}", server_config.addr))?;
    info!("metrics and health on http://{}", server_config.addr);
    let app = api::router(metrics.clone());
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
    });

    let result = match job {
        Job::Collect(config) => runner::run_collector(config, metrics, shutdown.clone()).await,
        Job::Recover(config) => runner::run_recoverer(config, shutdown.clone()).await,
    };

    shutdown.cancel();
    match server.await {
        Ok(Err(e)) => error!("http server: {}", e),
        Err(e) => error!("http server task: {}", e),
        Ok(Ok(())) => {}
    }
    result
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
