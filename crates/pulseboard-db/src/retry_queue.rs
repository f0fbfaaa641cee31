//! Database operations for `refresh_retry_queue`.
//!
//! Failed (platform, handle) pairs are re-upserted here with exponential
//! backoff and drained preferentially on each refresh cycle, so permanently
//! failing handles stay bounded in frequency without starving the main sweep.

use chrono::{DateTime, Utc};
use pulseboard_core::Platform;
use sqlx::PgPool;

use crate::DbError;

/// A row from `refresh_retry_queue`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RetryRow {
    pub id: i64,
    pub platform: String,
    pub username: String,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Backoff schedule in minutes: `clamp(2 * 2^min(retry_count, 5), 2, 360)`.
///
/// retry_count 1 → 4, 2 → 8, 3 → 16, … capped at 360 minutes.
#[must_use]
pub fn backoff_minutes(retry_count: i32) -> i64 {
    let exp = u32::try_from(retry_count.clamp(0, 5)).unwrap_or(5);
    i64::from(2u32 * 2u32.pow(exp)).clamp(2, 360)
}

/// Enqueue (or re-enqueue) a failed handle.
///
/// `retry_count` increments on every enqueue of the same (platform, username)
/// and `next_retry_at` is recomputed from the incremented count.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn enqueue_retry(
    pool: &PgPool,
    platform: Platform,
    username: &str,
    error_message: &str,
) -> Result<RetryRow, DbError> {
    // The backoff interval is derived in SQL from the post-increment count so
    // concurrent enqueues cannot race the Rust-side computation.
    let row = sqlx::query_as::<_, RetryRow>(
        "INSERT INTO refresh_retry_queue (platform, username, last_error, retry_count, next_retry_at) \
         VALUES ($1, $2, $3, 1, NOW() + make_interval(mins => LEAST(GREATEST(2 * POWER(2, 1), 2), 360)::int)) \
         ON CONFLICT (platform, username) DO UPDATE SET \
             last_error  = EXCLUDED.last_error, \
             retry_count = refresh_retry_queue.retry_count + 1, \
             next_retry_at = NOW() + make_interval(mins => \
                 LEAST(GREATEST(2 * POWER(2, LEAST(refresh_retry_queue.retry_count + 1, 5)), 2), 360)::int) \
         RETURNING id, platform, username, last_error, retry_count, next_retry_at, created_at",
    )
    .bind(platform.as_str())
    .bind(username)
    .bind(error_message)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Returns up to `limit` entries whose `next_retry_at <= now`, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_due_retries(
    pool: &PgPool,
    platform: Platform,
    limit: i64,
) -> Result<Vec<RetryRow>, DbError> {
    let rows = sqlx::query_as::<_, RetryRow>(
        "SELECT id, platform, username, last_error, retry_count, next_retry_at, created_at \
         FROM refresh_retry_queue \
         WHERE platform = $1 AND next_retry_at <= NOW() \
         ORDER BY next_retry_at ASC, id ASC \
         LIMIT $2",
    )
    .bind(platform.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns all retry entries (due or not), soonest first. Inspection only.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_retries(pool: &PgPool, limit: i64) -> Result<Vec<RetryRow>, DbError> {
    let rows = sqlx::query_as::<_, RetryRow>(
        "SELECT id, platform, username, last_error, retry_count, next_retry_at, created_at \
         FROM refresh_retry_queue \
         ORDER BY next_retry_at ASC, id ASC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Removes the retry entry for a handle after a successful refresh.
///
/// Removing a handle that has no entry is not an error.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn remove_retry(pool: &PgPool, platform: Platform, username: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM refresh_retry_queue WHERE platform = $1 AND username = $2")
        .bind(platform.as_str())
        .bind(username)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_then_caps() {
        assert_eq!(backoff_minutes(1), 4);
        assert_eq!(backoff_minutes(2), 8);
        assert_eq!(backoff_minutes(3), 16);
        assert_eq!(backoff_minutes(4), 32);
        assert_eq!(backoff_minutes(5), 64);
        // retry_count is clamped at 5, so the interval plateaus at 64.
        assert_eq!(backoff_minutes(6), 64);
        assert_eq!(backoff_minutes(100), 64);
    }

    #[test]
    fn backoff_floor_is_two_minutes() {
        assert_eq!(backoff_minutes(0), 2);
        assert_eq!(backoff_minutes(-3), 2);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn repeated_enqueue_increments_count_and_backoff(pool: PgPool) {
        let first = enqueue_retry(&pool, Platform::TikTok, "alice", "timeout")
            .await
            .expect("first enqueue");
        assert_eq!(first.retry_count, 1);

        let second = enqueue_retry(&pool, Platform::TikTok, "alice", "timeout again")
            .await
            .expect("second enqueue");
        assert_eq!(second.retry_count, 2);
        assert_eq!(second.last_error.as_deref(), Some("timeout again"));
        assert!(
            second.next_retry_at > first.next_retry_at,
            "backoff must grow: {} -> {}",
            first.next_retry_at,
            second.next_retry_at
        );

        let third = enqueue_retry(&pool, Platform::TikTok, "alice", "still failing")
            .await
            .expect("third enqueue");
        assert_eq!(third.retry_count, 3);

        // Deltas from enqueue time should be roughly 4, 8, 16 minutes.
        let d1 = (first.next_retry_at - first.created_at).num_minutes();
        assert!((3..=5).contains(&d1), "first backoff ~4min, got {d1}");
        let d3 = (third.next_retry_at - Utc::now()).num_minutes();
        assert!((14..=16).contains(&d3), "third backoff ~16min, got {d3}");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn due_listing_excludes_future_entries_and_remove_clears(pool: PgPool) {
        enqueue_retry(&pool, Platform::TikTok, "alice", "boom")
            .await
            .expect("enqueue");

        // Freshly enqueued entries are minutes in the future, not yet due.
        let due = list_due_retries(&pool, Platform::TikTok, 10)
            .await
            .expect("due");
        assert!(due.is_empty());

        sqlx::query(
            "UPDATE refresh_retry_queue SET next_retry_at = NOW() - INTERVAL '1 minute' \
             WHERE username = 'alice'",
        )
        .execute(&pool)
        .await
        .expect("age entry");

        let due = list_due_retries(&pool, Platform::TikTok, 10)
            .await
            .expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].username, "alice");

        remove_retry(&pool, Platform::TikTok, "alice")
            .await
            .expect("remove");
        let all = list_retries(&pool, 10).await.expect("list");
        assert!(all.is_empty());
    }
}
