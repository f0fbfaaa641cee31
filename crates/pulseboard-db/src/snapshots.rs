//! Database operations for the append-only `social_metrics_history` table.

use chrono::{DateTime, Utc};
use pulseboard_core::{MetricCounts, Platform};
use sqlx::PgPool;

use crate::DbError;

/// A row from `social_metrics_history`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub user_id: i64,
    pub platform: String,
    pub captured_at: DateTime<Utc>,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub saves: i64,
}

impl SnapshotRow {
    #[must_use]
    pub fn counts(&self) -> MetricCounts {
        MetricCounts {
            views: self.views,
            likes: self.likes,
            comments: self.comments,
            shares: self.shares,
            saves: self.saves,
        }
    }
}

/// Appends one cumulative snapshot row. Never updates or deletes prior rows.
///
/// Multiple snapshots per calendar day are expected when refreshes run more
/// than once daily; the aggregator picks the last per day.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails (including a duplicate
/// `(user_id, platform, captured_at)` capture).
pub async fn insert_snapshot(
    pool: &PgPool,
    user_id: i64,
    platform: Platform,
    captured_at: DateTime<Utc>,
    counts: MetricCounts,
) -> Result<SnapshotRow, DbError> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        "INSERT INTO social_metrics_history \
             (user_id, platform, captured_at, views, likes, comments, shares, saves) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING id, user_id, platform, captured_at, views, likes, comments, shares, saves",
    )
    .bind(user_id)
    .bind(platform.as_str())
    .bind(captured_at)
    .bind(counts.views)
    .bind(counts.likes)
    .bind(counts.comments)
    .bind(counts.shares)
    .bind(counts.saves)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches snapshots for the given owners and platform with
/// `captured_at` in `[from, to]`, ordered by owner then capture time.
///
/// The ascending capture order is what last-snapshot-per-day selection
/// in the aggregator relies on.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_snapshots_in_range(
    pool: &PgPool,
    user_ids: &[i64],
    platform: Platform,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<SnapshotRow>, DbError> {
    let rows = sqlx::query_as::<_, SnapshotRow>(
        "SELECT id, user_id, platform, captured_at, views, likes, comments, shares, saves \
         FROM social_metrics_history \
         WHERE user_id = ANY($1) AND platform = $2 \
           AND captured_at >= $3 AND captured_at <= $4 \
         ORDER BY user_id, captured_at",
    )
    .bind(user_ids)
    .bind(platform.as_str())
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn seed_user(pool: &PgPool) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (display_name) VALUES ('Test User') RETURNING id",
        )
        .fetch_one(pool)
        .await
        .expect("seed user")
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn snapshots_append_and_list_in_capture_order(pool: PgPool) {
        let user_id = seed_user(&pool).await;
        let counts = MetricCounts {
            views: 100,
            likes: 5,
            ..MetricCounts::default()
        };

        let later = Utc.with_ymd_and_hms(2026, 1, 2, 18, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 1, 2, 6, 0, 0).unwrap();

        insert_snapshot(&pool, user_id, Platform::TikTok, later, counts)
            .await
            .expect("insert later");
        insert_snapshot(&pool, user_id, Platform::TikTok, earlier, counts)
            .await
            .expect("insert earlier");

        let rows = list_snapshots_in_range(
            &pool,
            &[user_id],
            Platform::TikTok,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap(),
        )
        .await
        .expect("list");

        assert_eq!(rows.len(), 2);
        assert!(rows[0].captured_at < rows[1].captured_at, "ascending order");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn other_platform_snapshots_are_excluded(pool: PgPool) {
        let user_id = seed_user(&pool).await;
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 6, 0, 0).unwrap();

        insert_snapshot(&pool, user_id, Platform::Instagram, at, MetricCounts::default())
            .await
            .expect("insert");

        let rows = list_snapshots_in_range(
            &pool,
            &[user_id],
            Platform::TikTok,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap(),
        )
        .await
        .expect("list");

        assert!(rows.is_empty());
    }
}
