//! Bounded worker pool
//!
//! A single driver task polls the job store (2 s when idle) and dispatches
//! queued jobs up to the concurrency bound. Each job runs as its own task;
//! the driver never blocks on a running job, and any completion triggers
//! an immediate re-poll so sustained throughput equals the worker count.
//! Shutdown is cooperative: in-flight jobs finish, nothing is killed.

use super::runner::{run_job, JobContext};
use crate::db::jobs;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

/// Handle to the running pool.
pub struct WorkerPool {
    shutdown_tx: broadcast::Sender<()>,
    driver: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn the driver task.
    pub fn spawn(ctx: JobContext) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let driver = tokio::spawn(run_driver(ctx, shutdown_rx));
        Self {
            shutdown_tx,
            driver,
        }
    }

    /// Signal the driver to stop dispatching. In-flight jobs finish.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for the driver (and its in-flight jobs) to drain.
    pub async fn wait(self) {
        if let Err(e) = self.driver.await {
            error!(error = %e, "Worker pool driver task failed");
        }
    }
}

async fn run_driver(ctx: JobContext, mut shutdown: broadcast::Receiver<()>) {
    let poll_interval = Duration::from_millis(ctx.config.job_poll_interval_ms);
    let max_jobs = ctx.config.max_concurrent_jobs;

    // Fingerprints with a running task; a job is eligible only when queued
    // and not already held here.
    let mut active: HashSet<String> = HashSet::new();
    let mut running: JoinSet<String> = JoinSet::new();

    info!(max_jobs, "Worker pool started");

    loop {
        dispatch_eligible(&ctx, &mut active, &mut running, max_jobs).await;

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Worker pool shutting down, letting in-flight jobs finish");
                break;
            }
            Some(finished) = running.join_next(), if !running.is_empty() => {
                match finished {
                    Ok(fingerprint) => {
                        active.remove(&fingerprint);
                    }
                    Err(e) => {
                        // A panicked job task loses its fingerprint slot
                        // until restart; log loudly.
                        error!(error = %e, "Job task aborted unexpectedly");
                    }
                }
                // Immediate re-poll: fall through without sleeping
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    // Drain in-flight jobs
    while let Some(finished) = running.join_next().await {
        if let Err(e) = finished {
            error!(error = %e, "Job task aborted during drain");
        }
    }
    info!("Worker pool stopped");
}

async fn dispatch_eligible(
    ctx: &JobContext,
    active: &mut HashSet<String>,
    running: &mut JoinSet<String>,
    max_jobs: usize,
) {
    if active.len() >= max_jobs {
        return;
    }

    let queued = match jobs::list_queued(&ctx.db).await {
        Ok(queued) => queued,
        Err(e) => {
            error!(error = %e, "Failed to poll job queue");
            return;
        }
    };

    for job in queued {
        if active.len() >= max_jobs {
            break;
        }
        if active.contains(&job.fingerprint) {
            continue;
        }

        active.insert(job.fingerprint.clone());
        let job_ctx = ctx.clone();
        running.spawn(async move {
            let fingerprint = job.fingerprint.clone();
            run_job(&job_ctx, job).await;
            fingerprint
        });
    }
}
