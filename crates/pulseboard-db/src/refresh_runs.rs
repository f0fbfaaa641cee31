//! Database operations for `refresh_runs`.
//!
//! One row per orchestrator batch, with a `queued → running →
//! succeeded|failed` lifecycle.

use chrono::{DateTime, Utc};
use pulseboard_core::Platform;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `refresh_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshRunRow {
    pub id: i64,
    pub public_id: Uuid,
    pub platform: String,
    pub trigger_source: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Creates a new refresh run in `queued` status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_refresh_run(
    pool: &PgPool,
    platform: Platform,
    trigger_source: &str,
) -> Result<RefreshRunRow, DbError> {
    let public_id = Uuid::new_v4();

    let row = sqlx::query_as::<_, RefreshRunRow>(
        "INSERT INTO refresh_runs (public_id, platform, trigger_source, status) \
         VALUES ($1, $2, $3, 'queued') \
         RETURNING id, public_id, platform, trigger_source, status, \
                   started_at, completed_at, records_processed, error_message, created_at",
    )
    .bind(public_id)
    .bind(platform.as_str())
    .bind(trigger_source)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Marks a run as `running` and sets `started_at = NOW()`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRefreshRunTransition`] if the run is not in
/// `queued` status, or [`DbError::Sqlx`] if the update fails.
pub async fn start_refresh_run(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE refresh_runs SET status = 'running', started_at = NOW() \
         WHERE id = $1 AND status = 'queued'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRefreshRunTransition {
            id,
            expected_status: "queued",
        });
    }

    Ok(())
}

/// Marks a run as `succeeded`, sets `completed_at = NOW()` and `records_processed`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRefreshRunTransition`] if the run is not in
/// `running` status, or [`DbError::Sqlx`] if the update fails.
pub async fn complete_refresh_run(
    pool: &PgPool,
    id: i64,
    records_processed: i32,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE refresh_runs \
         SET status = 'succeeded', completed_at = NOW(), records_processed = $1 \
         WHERE id = $2 AND status = 'running'",
    )
    .bind(records_processed)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRefreshRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Marks a run as `failed`, sets `completed_at = NOW()` and `error_message`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRefreshRunTransition`] if the run is not in
/// `running` status, or [`DbError::Sqlx`] if the update fails.
pub async fn fail_refresh_run(pool: &PgPool, id: i64, error_message: &str) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE refresh_runs \
         SET status = 'failed', completed_at = NOW(), error_message = $1 \
         WHERE id = $2 AND status = 'running'",
    )
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRefreshRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Returns the most recent `limit` runs, ordered by `created_at DESC`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_refresh_runs(pool: &PgPool, limit: i64) -> Result<Vec<RefreshRunRow>, DbError> {
    let rows = sqlx::query_as::<_, RefreshRunRow>(
        "SELECT id, public_id, platform, trigger_source, status, \
                started_at, completed_at, records_processed, error_message, created_at \
         FROM refresh_runs \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "../../migrations")]
    async fn run_lifecycle_happy_path(pool: PgPool) {
        let run = create_refresh_run(&pool, Platform::TikTok, "test")
            .await
            .expect("create");
        assert_eq!(run.status, "queued");

        start_refresh_run(&pool, run.id).await.expect("start");
        complete_refresh_run(&pool, run.id, 7).await.expect("complete");

        let runs = list_refresh_runs(&pool, 10).await.expect("list");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "succeeded");
        assert_eq!(runs[0].records_processed, 7);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn completing_a_queued_run_is_rejected(pool: PgPool) {
        let run = create_refresh_run(&pool, Platform::TikTok, "test")
            .await
            .expect("create");

        let result = complete_refresh_run(&pool, run.id, 0).await;
        assert!(matches!(
            result,
            Err(DbError::InvalidRefreshRunTransition { .. })
        ));
    }
}
