//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers one
//! recurring refresh sweep per platform. Each sweep polls the orchestrator
//! batch-by-batch until the handle list is exhausted.

use std::sync::Arc;

use pulseboard_core::Platform;
use pulseboard_ingest::Refresher;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Hard ceiling on batches per sweep; a sweep over any sane handle list
/// finishes well under this.
const MAX_BATCHES_PER_SWEEP: usize = 500;

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process; dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(refresher: Arc<Refresher>) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    // Staggered so the platforms do not contend for scraper quota.
    register_refresh_job(&scheduler, Arc::clone(&refresher), Platform::TikTok, "0 0 */6 * * *")
        .await?;
    register_refresh_job(&scheduler, Arc::clone(&refresher), Platform::Instagram, "0 20 */6 * * *")
        .await?;
    register_refresh_job(&scheduler, refresher, Platform::YouTube, "0 40 */6 * * *").await?;

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_refresh_job(
    scheduler: &JobScheduler,
    refresher: Arc<Refresher>,
    platform: Platform,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let refresher = Arc::clone(&refresher);

        Box::pin(async move {
            tracing::info!(platform = platform.as_str(), "scheduler: starting refresh sweep");
            run_refresh_sweep(&refresher, platform).await;
            tracing::info!(platform = platform.as_str(), "scheduler: refresh sweep complete");
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Polls the orchestrator until the handle list is exhausted. Batch errors
/// end the sweep early; the next scheduled run starts over from offset 0.
async fn run_refresh_sweep(refresher: &Refresher, platform: Platform) {
    let mut offset = 0;

    for _ in 0..MAX_BATCHES_PER_SWEEP {
        let summary = match refresher.run_batch(platform, offset, None, "scheduler").await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(
                    platform = platform.as_str(),
                    offset,
                    error = %e,
                    "scheduler: refresh batch failed, abandoning sweep"
                );
                return;
            }
        };

        tracing::debug!(
            platform = platform.as_str(),
            succeeded = summary.succeeded,
            failed = summary.failed,
            remaining = summary.remaining,
            "scheduler: refresh batch finished"
        );

        if summary.remaining == 0 {
            return;
        }
        if summary.next_offset <= offset {
            // The wall-clock budget skipped the whole batch; give the
            // provider a breather instead of spinning.
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
        offset = summary.next_offset;
    }

    tracing::warn!(
        platform = platform.as_str(),
        "scheduler: sweep hit the batch ceiling before finishing"
    );
}
