//! Cumulative snapshot writing.
//!
//! A snapshot is the sum of an owner's posts_daily counters over a trailing
//! window, appended to `social_metrics_history`. The window (default 60
//! days) means "cumulative" is scoped to recent history rather than account
//! lifetime; deltas computed downstream are unaffected as long as the window
//! stays fixed between captures.

use chrono::{DateTime, Duration, Utc};
use pulseboard_core::Platform;
use pulseboard_db::{insert_snapshot, list_owner_usernames, sum_posts_in_window, SnapshotRow};
use sqlx::PgPool;

use crate::IngestError;

/// Appends one snapshot row for the owner, summing all of their handles'
/// posts within `[captured_at - window_days, captured_at]`.
///
/// Returns `None` when the owner has no active handles on the platform;
/// there is nothing to sum and an all-zero row would only add noise.
///
/// # Errors
///
/// Returns [`IngestError::Db`] if any query fails, including a duplicate
/// `(user_id, platform, captured_at)` capture.
pub async fn write_owner_snapshot(
    pool: &PgPool,
    owner_id: i64,
    platform: Platform,
    window_days: i64,
    captured_at: DateTime<Utc>,
) -> Result<Option<SnapshotRow>, IngestError> {
    let usernames = list_owner_usernames(pool, owner_id, platform).await?;
    if usernames.is_empty() {
        tracing::debug!(owner_id, platform = platform.as_str(), "owner has no handles, skipping snapshot");
        return Ok(None);
    }

    let window_start = captured_at - Duration::days(window_days);
    let totals = sum_posts_in_window(pool, platform, &usernames, window_start, captured_at).await?;

    let row = insert_snapshot(pool, owner_id, platform, captured_at, totals).await?;
    tracing::info!(
        owner_id,
        platform = platform.as_str(),
        views = totals.views,
        likes = totals.likes,
        "appended cumulative snapshot"
    );
    Ok(Some(row))
}
