//! Job queue worker: runs `JOBQ_WORKERS` pollers against Postgres until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use jobq_core::Job;
use jobq_infra::{JobPoller, JobPollerConfig, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobq_observability::init();

    let config = StoreConfig::from_env().context("invalid job queue configuration")?;
    let store = Arc::new(
        config
            .postgres_store()
            .await
            .context("failed to open Postgres job store")?,
    );
    store
        .ensure_schema()
        .await
        .context("failed to create job tables")?;

    info!(
        layout = %config.layout,
        completion = %config.completion,
        workers = config.workers,
        tables = %config.tables.prefix(),
        "job queue worker starting"
    );

    let handles: Vec<_> = (0..config.workers.max(1))
        .map(|n| {
            let mut poller = JobPoller::new(store.clone());
            poller.register_handler("*", log_job);
            poller.spawn(
                JobPollerConfig::default()
                    .with_name(format!("worker-{n}"))
                    .with_poll_interval(config.poll_interval)
                    .with_completion(config.completion),
            )
        })
        .collect();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    for handle in handles {
        let stats = handle.stats();
        handle.shutdown().await;
        info!(
            claimed = stats.claimed,
            completed = stats.completed,
            failed = stats.failed,
            store_errors = stats.store_errors,
            "poller stopped"
        );
    }

    Ok(())
}

/// Default handler: acknowledges every job after logging it.
fn log_job(job: &Job) -> Result<(), String> {
    info!(
        job_id = %job.id,
        job_name = %job.job_name,
        job_param = job.job_param.as_deref().unwrap_or(""),
        started_count = job.started_count,
        "processing job"
    );
    Ok(())
}
