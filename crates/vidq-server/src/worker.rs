//! Worker process entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use vidq_db::Database;
use vidq_jobs::{
    CoordinatorBuilder, ErrorCallbackRegistry, FfmpegExecutor, MediaJobHandler, StorageLayout,
    WorkerHandle,
};

use crate::config::{redact_url, ServerConfig};
use crate::shutdown_signal;

const SCHEMA_POLL_INTERVAL: Duration = Duration::from_secs(1);
const POOL_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Run one worker until a shutdown signal arrives.
///
/// The coordinator is started before the store is prepared and stays behind
/// its gate until migrations (or an externally managed schema) are in place.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!(
        subsystem = "worker",
        database = %redact_url(&config.database_url),
        designated = config.worker.designated,
        slot = ?config.worker.slot,
        "Starting worker"
    );

    let db = Database::connect_with_config(&config.database_url, config.pool.clone())
        .await
        .context("failed to connect to database")?;

    let storage = StorageLayout::from_env();
    let handler = MediaJobHandler::new(
        db.video_repository(),
        Arc::new(FfmpegExecutor::from_env()),
        storage,
    );

    let handle = CoordinatorBuilder::new(db.job_repository(), Arc::new(handler))
        .with_config(config.worker.clone())
        .with_callbacks(ErrorCallbackRegistry::new())
        .build()
        .start();
    spawn_event_logger(&handle);

    let prepared = tokio::select! {
        res = prepare_store(&db, config.run_migrations) => Some(res),
        _ = shutdown_signal() => None,
    };
    match prepared {
        Some(Ok(())) => {
            vidq_db::log_pool_metrics(db.pool());
            handle.gate().mark_store_ready();
        }
        Some(Err(e)) => {
            handle.shutdown().await?;
            return Err(e);
        }
        None => {
            info!(subsystem = "worker", "Interrupted before store was ready");
            handle.shutdown().await?;
            return Ok(());
        }
    }

    let monitor = spawn_pool_monitor(db.clone());
    shutdown_signal().await;
    info!(subsystem = "worker", "Shutting down, waiting for in-flight job");
    monitor.abort();
    handle.shutdown().await?;
    info!(subsystem = "worker", "Worker shutdown complete");
    Ok(())
}

/// Apply migrations, or wait for someone else to.
async fn prepare_store(db: &Database, run_migrations: bool) -> anyhow::Result<()> {
    if run_migrations {
        db.migrate().await.context("failed to run migrations")?;
        info!(subsystem = "worker", "Migrations applied");
        return Ok(());
    }

    loop {
        match db.schema_ready().await {
            Ok(true) => return Ok(()),
            Ok(false) => debug!(subsystem = "worker", "Waiting for schema"),
            Err(e) => warn!(subsystem = "worker", error = %e, "Schema check failed"),
        }
        tokio::time::sleep(SCHEMA_POLL_INTERVAL).await;
    }
}

fn spawn_pool_monitor(db: Database) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POOL_METRICS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately and startup already logged once.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            vidq_db::log_pool_metrics(db.pool());
        }
    })
}

fn spawn_event_logger(handle: &WorkerHandle) {
    let mut events = handle.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(subsystem = "worker", event = ?event, "Worker event"),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(subsystem = "worker", skipped, "Worker event log lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
