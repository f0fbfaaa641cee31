//! Refresh command handlers for the CLI.
//!
//! These are called from `main` after the database pool and config are
//! established. A full refresh drains the handle list batch by batch;
//! per-handle failures land in the retry queue rather than aborting
//! the run.

use pulseboard_core::Platform;
use pulseboard_ingest::Refresher;

/// Hard ceiling on batches per invocation so a stuck orchestrator cannot
/// loop forever.
const MAX_BATCHES: usize = 500;

/// Run refresh batches for `platform` until the handle list is exhausted.
///
/// When `batch` is `None` the configured batch size applies. A non-zero
/// `offset` resumes a previously interrupted sweep.
///
/// # Errors
///
/// Returns an error if a batch fails outright (database unavailable,
/// key pool missing). Per-handle scrape failures are recorded in the
/// retry queue and do not abort the sweep.
pub(crate) async fn run_refresh(
    refresher: &Refresher,
    platform: Platform,
    mut offset: usize,
    batch: Option<usize>,
) -> anyhow::Result<()> {
    let mut total_posts: usize = 0;
    let mut total_succeeded: usize = 0;
    let mut total_failed: usize = 0;

    for _ in 0..MAX_BATCHES {
        let summary = refresher
            .run_batch(platform, offset, batch, "cli")
            .await
            .map_err(|e| anyhow::anyhow!("refresh batch at offset {offset} failed: {e}"))?;

        for result in &summary.results {
            match &result.error {
                Some(error) => eprintln!(
                    "error: {} refresh failed for {}: {error}",
                    platform.as_str(),
                    result.username
                ),
                None => tracing::debug!(
                    username = %result.username,
                    status = result.status,
                    posts = result.posts_upserted,
                    "handle refreshed"
                ),
            }
        }

        total_posts = total_posts.saturating_add(
            summary
                .results
                .iter()
                .map(|r| r.posts_upserted)
                .sum::<usize>(),
        );
        total_succeeded = total_succeeded.saturating_add(summary.succeeded);
        total_failed = total_failed.saturating_add(summary.failed);

        if summary.remaining == 0 {
            println!(
                "refreshed {total_succeeded} handles ({total_failed} failed, {total_posts} posts) on {}",
                platform.as_str()
            );
            return Ok(());
        }

        if summary.next_offset <= offset {
            anyhow::bail!(
                "refresh made no progress at offset {offset} (wall-clock budget exhausted); \
                 re-run with --offset {offset} to resume"
            );
        }
        offset = summary.next_offset;
    }

    anyhow::bail!("refresh hit the batch ceiling before draining the handle list")
}

/// Refresh one handle and report the outcome.
///
/// # Errors
///
/// Returns an error when the refresher cannot be set up, or when the
/// handle itself fails (the failure is already queued for retry).
pub(crate) async fn run_refresh_single(
    refresher: &Refresher,
    platform: Platform,
    handle: &str,
) -> anyhow::Result<()> {
    let result = refresher.run_single(platform, handle, "cli").await?;

    match result.error {
        Some(error) => anyhow::bail!(
            "{} refresh failed for {} (queued for retry): {error}",
            platform.as_str(),
            result.username
        ),
        None => {
            println!(
                "refreshed {} on {} ({} posts)",
                result.username,
                platform.as_str(),
                result.posts_upserted
            );
            Ok(())
        }
    }
}

/// Print the persisted retry queue, soonest retry first.
pub(crate) async fn run_list_retries(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<()> {
    let rows = pulseboard_db::list_retries(pool, limit).await?;

    if rows.is_empty() {
        println!("retry queue is empty");
        return Ok(());
    }

    let now = chrono::Utc::now();
    for row in rows {
        let due = if row.next_retry_at <= now {
            "due"
        } else {
            "waiting"
        };
        println!(
            "{:<10} {:<24} attempts={:<2} next_retry={} [{due}] {}",
            row.platform,
            row.username,
            row.retry_count,
            row.next_retry_at.format("%Y-%m-%d %H:%M:%S"),
            row.last_error.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

/// Print recent refresh runs, newest first.
pub(crate) async fn run_list_runs(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<()> {
    let rows = pulseboard_db::list_refresh_runs(pool, limit).await?;

    if rows.is_empty() {
        println!("no refresh runs recorded");
        return Ok(());
    }

    for row in rows {
        let completed = row
            .completed_at
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        println!(
            "{} {:<10} {:<9} {:<10} records={:<6} completed={completed} {}",
            row.public_id,
            row.platform,
            row.trigger_source,
            row.status,
            row.records_processed,
            row.error_message.as_deref().unwrap_or("")
        );
    }

    Ok(())
}
