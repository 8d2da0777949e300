//! Database housekeeping: nightly VACUUM and retention pruning.
//!
//! Both jobs run on a `tokio-cron-scheduler` instance in local time. The same
//! functions back the `skylark db vacuum|prune` subcommands.

use std::sync::Arc;

use chrono::{Duration, Local};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use skylark_types::error::RepositoryError;

use crate::clock::Clock;
use crate::storage::MaintenanceRepository;

/// VACUUM at 02:00.
pub const VACUUM_SCHEDULE: &str = "0 0 2 * * *";
/// Retention pruning at 03:00.
pub const PRUNE_SCHEDULE: &str = "0 0 3 * * *";

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What a retention pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    /// Retention is negative: keep everything.
    Disabled,
    /// Retention is zero: every conversation row was removed.
    Purged(u64),
    Pruned(u64),
}

/// Apply the retention policy once. Plugin data is never touched.
pub async fn run_prune<M: MaintenanceRepository + ?Sized>(
    store: &M,
    clock: &dyn Clock,
    retention_days: i64,
) -> Result<PruneOutcome, RepositoryError> {
    if retention_days < 0 {
        return Ok(PruneOutcome::Disabled);
    }
    if retention_days == 0 {
        let rows = store.purge_conversations().await?;
        info!(rows, "purged all conversation rows");
        return Ok(PruneOutcome::Purged(rows));
    }
    let cutoff = clock.now() - Duration::days(retention_days);
    let rows = store.prune_older_than(cutoff).await?;
    info!(rows, %cutoff, "pruned stale conversation rows");
    Ok(PruneOutcome::Pruned(rows))
}

/// Start a scheduler with the vacuum and prune jobs registered.
///
/// The caller owns the returned scheduler and shuts it down on exit.
pub async fn start_maintenance<M>(
    store: Arc<M>,
    clock: Arc<dyn Clock>,
    retention_days: i64,
) -> Result<JobScheduler, MaintenanceError>
where
    M: MaintenanceRepository + 'static,
{
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| MaintenanceError::Scheduler(e.to_string()))?;

    let vacuum_store = store.clone();
    let vacuum = Job::new_async_tz(VACUUM_SCHEDULE, Local, move |_uuid, _lock| {
        let store = vacuum_store.clone();
        Box::pin(async move {
            match store.vacuum().await {
                Ok(()) => info!("database vacuumed"),
                Err(e) => warn!(error = %e, "vacuum failed"),
            }
        })
    })
    .map_err(|e| MaintenanceError::Scheduler(e.to_string()))?;

    let prune = Job::new_async_tz(PRUNE_SCHEDULE, Local, move |_uuid, _lock| {
        let store = store.clone();
        let clock = clock.clone();
        Box::pin(async move {
            if let Err(e) = run_prune(store.as_ref(), clock.as_ref(), retention_days).await {
                warn!(error = %e, "retention pruning failed");
            }
        })
    })
    .map_err(|e| MaintenanceError::Scheduler(e.to_string()))?;

    for job in [vacuum, prune] {
        scheduler
            .add(job)
            .await
            .map_err(|e| MaintenanceError::Scheduler(e.to_string()))?;
    }
    scheduler
        .start()
        .await
        .map_err(|e| MaintenanceError::Scheduler(e.to_string()))?;

    info!(retention_days, "maintenance jobs scheduled");
    Ok(scheduler)
}
