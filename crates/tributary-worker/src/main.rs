//! # Tributary Worker
//!
//! Consumes the configured queue from Redis and logs every job it receives.
//! Useful for draining a queue or watching what producers publish.
//!
//! Configuration comes from `./config/*.toml` and `TRIBUTARY__*` variables,
//! for example `TRIBUTARY__WORKER__NAME=emails`.

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tributary_config::ConfigLoader;
use tributary_core::init_tracing;
use tributary_jobs::metrics::register_metrics;
use tributary_jobs::{processor, LogService, RedisLog, Worker, WorkerOptions};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Worker error: {e:#}");
        eprintln!("tributary-worker: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ConfigLoader::from_default_location()?.get().await;
    init_tracing(&config.telemetry)?;
    register_metrics();

    info!("Starting Tributary worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    let log: Arc<dyn LogService> = Arc::new(RedisLog::connect(&config.redis).await?);
    let worker = Worker::new(
        log,
        WorkerOptions::from(&config.worker),
        processor(|delivery| async move {
            info!(
                subject = %delivery.subject,
                sequence = delivery.meta.sequence,
                delivery_count = delivery.meta.delivery_count,
                payload = %String::from_utf8_lossy(&delivery.payload),
                "Received job"
            );
            Ok(())
        }),
    );

    worker.setup().await?;
    worker.start()?;

    shutdown_signal().await;
    worker.stop().await;

    let stats = worker.stats();
    info!(
        acknowledged = stats.acknowledged,
        terminated = stats.terminated,
        fetch_errors = stats.fetch_errors,
        "Worker shut down"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, stopping worker...");
        }
        () = terminate => {
            info!("Received terminate signal, stopping worker...");
        }
    }
}
