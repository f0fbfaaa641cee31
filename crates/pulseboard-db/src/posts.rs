//! Database operations for the per-platform `*_posts_daily` tables.
//!
//! Each platform has its own table with an identical shape. The table name
//! is selected from the [`Platform`] enum, never from user input.

use chrono::{DateTime, NaiveDate, Utc};
use pulseboard_core::{MetricCounts, Platform};
use sqlx::PgPool;

use crate::DbError;

fn posts_table(platform: Platform) -> &'static str {
    match platform {
        Platform::TikTok => "tiktok_posts_daily",
        Platform::Instagram => "instagram_posts_daily",
        Platform::YouTube => "youtube_posts_daily",
    }
}

/// A canonical post row ready for upsert.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub post_id: String,
    pub username: String,
    pub posted_at: DateTime<Utc>,
    pub counts: MetricCounts,
    pub caption: Option<String>,
}

/// Per-day absolute post totals, used as the accrual fallback.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostDateAggregate {
    pub day: NaiveDate,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub saves: i64,
}

impl PostDateAggregate {
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

/// Idempotently upserts one post keyed on `post_id`.
///
/// Conflicting upserts overwrite counter fields with the latest fetched
/// values; last write wins, no merge.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_post(pool: &PgPool, platform: Platform, post: &NewPost) -> Result<(), DbError> {
    let sql = format!(
        "INSERT INTO {} (post_id, username, posted_at, views, likes, comments, shares, saves, caption, fetched_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW()) \
         ON CONFLICT (post_id) DO UPDATE SET \
             username   = EXCLUDED.username, \
             posted_at  = EXCLUDED.posted_at, \
             views      = EXCLUDED.views, \
             likes      = EXCLUDED.likes, \
             comments   = EXCLUDED.comments, \
             shares     = EXCLUDED.shares, \
             saves      = EXCLUDED.saves, \
             caption    = EXCLUDED.caption, \
             fetched_at = NOW()",
        posts_table(platform)
    );

    sqlx::query(&sql)
        .bind(&post.post_id)
        .bind(&post.username)
        .bind(post.posted_at)
        .bind(post.counts.views)
        .bind(post.counts.likes)
        .bind(post.counts.comments)
        .bind(post.counts.shares)
        .bind(post.counts.saves)
        .bind(post.caption.as_deref())
        .execute(pool)
        .await?;

    Ok(())
}

/// Sums counters over all posts by the given usernames posted within
/// `[window_start, window_end]`.
///
/// This is the snapshot writer's input: a rolling-window cumulative total,
/// not a lifetime total.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn sum_posts_in_window(
    pool: &PgPool,
    platform: Platform,
    usernames: &[String],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<MetricCounts, DbError> {
    let sql = format!(
        "SELECT COALESCE(SUM(views), 0)::BIGINT    AS views, \
                COALESCE(SUM(likes), 0)::BIGINT    AS likes, \
                COALESCE(SUM(comments), 0)::BIGINT AS comments, \
                COALESCE(SUM(shares), 0)::BIGINT   AS shares, \
                COALESCE(SUM(saves), 0)::BIGINT    AS saves \
         FROM {} \
         WHERE username = ANY($1) AND posted_at >= $2 AND posted_at <= $3",
        posts_table(platform)
    );

    let row: (i64, i64, i64, i64, i64) = sqlx::query_as(&sql)
        .bind(usernames)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(pool)
        .await?;

    Ok(MetricCounts {
        views: row.0,
        likes: row.1,
        comments: row.2,
        shares: row.3,
        saves: row.4,
    })
}

/// One post's date, caption, and counters, for caption-level filtering
/// before aggregation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostCaptionRow {
    pub day: NaiveDate,
    pub caption: Option<String>,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub saves: i64,
}

impl PostCaptionRow {
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

/// Lists individual posts with captions by post date, for callers that need
/// to filter rows (hashtag campaigns) before summing.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_posts_by_date(
    pool: &PgPool,
    platform: Platform,
    usernames: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PostCaptionRow>, DbError> {
    let sql = format!(
        "SELECT (posted_at AT TIME ZONE 'UTC')::date AS day, \
                caption, views, likes, comments, shares, saves \
         FROM {} \
         WHERE username = ANY($1) \
           AND (posted_at AT TIME ZONE 'UTC')::date BETWEEN $2 AND $3 \
         ORDER BY day",
        posts_table(platform)
    );

    let rows = sqlx::query_as::<_, PostCaptionRow>(&sql)
        .bind(usernames)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Groups absolute post counters by the post's own date, for the accrual
/// fallback path. The result is an approximation, not a delta series.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_post_aggregates_by_date(
    pool: &PgPool,
    platform: Platform,
    usernames: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PostDateAggregate>, DbError> {
    let sql = format!(
        "SELECT (posted_at AT TIME ZONE 'UTC')::date AS day, \
                COALESCE(SUM(views), 0)::BIGINT    AS views, \
                COALESCE(SUM(likes), 0)::BIGINT    AS likes, \
                COALESCE(SUM(comments), 0)::BIGINT AS comments, \
                COALESCE(SUM(shares), 0)::BIGINT   AS shares, \
                COALESCE(SUM(saves), 0)::BIGINT    AS saves \
         FROM {} \
         WHERE username = ANY($1) \
           AND (posted_at AT TIME ZONE 'UTC')::date BETWEEN $2 AND $3 \
         GROUP BY day \
         ORDER BY day",
        posts_table(platform)
    );

    let rows = sqlx::query_as::<_, PostDateAggregate>(&sql)
        .bind(usernames)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_post(id: &str, views: i64) -> NewPost {
        NewPost {
            post_id: id.to_string(),
            username: "alice".to_string(),
            posted_at: Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap(),
            counts: MetricCounts {
                views,
                likes: 10,
                comments: 2,
                shares: 1,
                saves: 0,
            },
            caption: Some("hello #world".to_string()),
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn upsert_post_is_idempotent_and_last_write_wins(pool: PgPool) {
        upsert_post(&pool, Platform::TikTok, &sample_post("v1", 100))
            .await
            .expect("first upsert");
        upsert_post(&pool, Platform::TikTok, &sample_post("v1", 250))
            .await
            .expect("second upsert");

        let (count, views): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(MAX(views), 0) FROM tiktok_posts_daily WHERE post_id = 'v1'",
        )
        .fetch_one(&pool)
        .await
        .expect("count row");

        assert_eq!(count, 1, "re-upsert must leave exactly one row");
        assert_eq!(views, 250, "counters must reflect the latest input");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn sum_posts_in_window_excludes_posts_outside_window(pool: PgPool) {
        upsert_post(&pool, Platform::TikTok, &sample_post("in-window", 100))
            .await
            .expect("upsert");

        let mut old = sample_post("out-of-window", 999);
        old.posted_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        upsert_post(&pool, Platform::TikTok, &old)
            .await
            .expect("upsert old");

        let totals = sum_posts_in_window(
            &pool,
            Platform::TikTok,
            &["alice".to_string()],
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap(),
        )
        .await
        .expect("sum");

        assert_eq!(totals.views, 100);
        assert_eq!(totals.likes, 10);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn list_posts_by_date_keeps_captions(pool: PgPool) {
        upsert_post(&pool, Platform::TikTok, &sample_post("a", 100))
            .await
            .expect("upsert");
        let mut bare = sample_post("b", 50);
        bare.caption = None;
        upsert_post(&pool, Platform::TikTok, &bare)
            .await
            .expect("upsert");

        let rows = list_posts_by_date(
            &pool,
            Platform::TikTok,
            &["alice".to_string()],
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
        )
        .await
        .expect("rows");

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.caption.as_deref() == Some("hello #world")));
        assert!(rows.iter().any(|r| r.caption.is_none()));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn post_aggregates_group_by_post_date(pool: PgPool) {
        upsert_post(&pool, Platform::TikTok, &sample_post("a", 100))
            .await
            .expect("upsert");
        upsert_post(&pool, Platform::TikTok, &sample_post("b", 50))
            .await
            .expect("upsert");

        let rows = list_post_aggregates_by_date(
            &pool,
            Platform::TikTok,
            &["alice".to_string()],
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
        )
        .await
        .expect("aggregates");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].day, NaiveDate::from_ymd_opt(2026, 1, 3).unwrap());
        assert_eq!(rows[0].views, 150);
    }
}
