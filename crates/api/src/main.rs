use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use simbench_core::UserId;
use simbench_infra::config::ServiceConfig;
use simbench_infra::jobs::{HttpExecutionDelegate, SimulationWorker, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "simbench-api", about = "Simulation job queue API and worker")]
struct Args {
    /// Path to the YAML service config.
    #[arg(long, env = "SIMBENCH_CONFIG", default_value = "config/service.yaml")]
    config: PathBuf,

    /// Issue a session for this user id at startup and log it (dev only).
    #[arg(long)]
    dev_user: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    simbench_observability::init(&config.logging.level, config.logging.format);

    let services = simbench_api::app::build_services(&config)
        .await
        .context("wiring services")?;

    if let Some(user) = args.dev_user {
        let session = services
            .sessions
            .create(UserId::new(user))
            .await
            .context("issuing dev session")?;
        tracing::warn!(user_id = user, session_id = %session.session_id, "issued dev session");
    }

    let shutdown = CancellationToken::new();
    let worker = if config.worker.enabled {
        let delegate = HttpExecutionDelegate::with_timeout(
            &config.advisor.url,
            config.worker.execution_timeout(),
        )
        .context("building advisor client")?;
        tracing::info!(advisor = %delegate.endpoint(), "simulation worker enabled");

        let worker_config = WorkerConfig::default()
            .with_poll_interval(config.worker.poll_interval())
            .with_execution_timeout(config.worker.execution_timeout());
        Some(SimulationWorker::new(services.jobs.clone(), delegate, worker_config).spawn(shutdown.clone()))
    } else {
        tracing::info!("simulation worker disabled");
        None
    };

    let app = simbench_api::app::build_app(services);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    // HTTP has drained; let any in-flight simulation finish.
    shutdown.cancel();
    if let Some(worker) = worker {
        let stats = worker.shutdown().await;
        tracing::info!(
            processed = stats.jobs_processed,
            succeeded = stats.jobs_succeeded,
            failed = stats.jobs_failed,
            "worker stopped"
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
