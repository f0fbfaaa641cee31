use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pulseboard_accrual::{accrue, AccrualOptions, PostDayTotal, SnapshotInput};
use pulseboard_core::hashtags::HashtagFilter;
use pulseboard_core::Platform;
use pulseboard_db::{
    list_owner_usernames, list_post_aggregates_by_date, list_posts_by_date,
    list_snapshots_in_range,
};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState, ResponseMeta};

const MAX_RANGE_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
pub(super) struct SeriesQuery {
    pub platform: String,
    /// Comma-separated owner ids.
    pub user_ids: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Last-N-days preset; overrides `start`/`end`.
    pub days: Option<i64>,
    /// `accrual` (default) or `postdate`.
    pub mode: Option<String>,
    pub cutoff: Option<NaiveDate>,
    /// 0 disables cutoff masking; default on.
    pub mask: Option<u8>,
    /// 1 drops leading all-zero days.
    pub trim: Option<u8>,
    /// 1 returns raw snapshot rows instead of the accrual series.
    pub snapshots_only: Option<u8>,
    /// Comma-separated hashtags a post's caption must all carry. Forces the
    /// post-date path, since snapshots are aggregated past caption level.
    pub hashtags: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct SeriesData {
    platform: Platform,
    start: NaiveDate,
    end: NaiveDate,
    /// `accrual` when differenced from snapshots, `postdate` when
    /// approximated from absolute per-post-date totals.
    source: &'static str,
    series: Vec<pulseboard_accrual::DayMetrics>,
}

#[derive(Debug, Serialize)]
pub(super) struct SnapshotItem {
    user_id: i64,
    captured_at: DateTime<Utc>,
    views: i64,
    likes: i64,
    comments: i64,
    shares: i64,
    saves: i64,
}

enum SeriesResponse {
    Series(SeriesData),
    Snapshots(Vec<SnapshotItem>),
}

pub(super) async fn get_metrics_series(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SeriesQuery>,
) -> Result<axum::response::Response, ApiError> {
    use axum::response::IntoResponse;

    let response = build_series(&state, &req_id.0, &query).await?;
    let meta = ResponseMeta::new(req_id.0);
    Ok(match response {
        SeriesResponse::Series(data) => Json(ApiResponse { data, meta }).into_response(),
        SeriesResponse::Snapshots(data) => Json(ApiResponse { data, meta }).into_response(),
    })
}

async fn build_series(
    state: &AppState,
    req_id: &str,
    query: &SeriesQuery,
) -> Result<SeriesResponse, ApiError> {
    let platform: Platform = query
        .platform
        .parse()
        .map_err(|_| bad_request(req_id, format!("unknown platform '{}'", query.platform)))?;

    let user_ids = parse_user_ids(&query.user_ids)
        .ok_or_else(|| bad_request(req_id, "user_ids must be a comma-separated list of ids"))?;

    let (start, end) = resolve_range(query)
        .map_err(|message| bad_request(req_id, message))?;

    // Fetch one day before the range so the baseline snapshot resolves.
    let fetch_from = (start - Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| bad_request(req_id, "invalid start date"))?;
    let fetch_to = end
        .and_hms_opt(23, 59, 59)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| bad_request(req_id, "invalid end date"))?;

    let rows = list_snapshots_in_range(&state.pool, &user_ids, platform, fetch_from, fetch_to)
        .await
        .map_err(|e| map_db_error(req_id.to_string(), &e))?;

    if query.snapshots_only == Some(1) {
        let items = rows
            .into_iter()
            .map(|r| SnapshotItem {
                user_id: r.user_id,
                captured_at: r.captured_at,
                views: r.views,
                likes: r.likes,
                comments: r.comments,
                shares: r.shares,
                saves: r.saves,
            })
            .collect();
        return Ok(SeriesResponse::Snapshots(items));
    }

    let inputs: Vec<SnapshotInput> = rows
        .iter()
        .map(|r| SnapshotInput {
            user_id: r.user_id,
            captured_on: r.captured_at.date_naive(),
            counts: r.counts(),
        })
        .collect();

    let mut options = AccrualOptions::new(start, end);
    options.cutoff = query.cutoff.or(state.config.accrual_cutoff);
    options.apply_cutoff_mask = query.mask != Some(0);
    options.trim_leading_zeros = query.trim == Some(1);

    let hashtag_filter = query
        .hashtags
        .as_deref()
        .map(|raw| HashtagFilter::new(raw.split(',')));

    // Hashtag campaigns only make sense at post level; snapshots are
    // aggregated past caption visibility.
    let mode = if hashtag_filter.is_some() {
        "postdate"
    } else {
        query.mode.as_deref().unwrap_or("accrual")
    };
    let mut source = "accrual";
    let mut series = match mode {
        "accrual" => accrue(&inputs, &[], &options),
        "postdate" => Vec::new(),
        other => return Err(bad_request(req_id, format!("unknown mode '{other}'"))),
    };

    if series.iter().all(|d| d.counts.is_zero()) {
        let fallback = post_date_totals(
            state,
            platform,
            &user_ids,
            start,
            end,
            hashtag_filter.as_ref(),
            req_id,
        )
        .await?;
        if !fallback.is_empty() || mode == "postdate" {
            series = accrue(&[], &fallback, &options);
            source = "postdate";
        }
    }

    Ok(SeriesResponse::Series(SeriesData {
        platform,
        start,
        end,
        source,
        series,
    }))
}

/// Absolute per-post-date totals across every handle the owners map to.
///
/// With a hashtag filter, posts are fetched row by row and filtered on
/// caption before summing; without one the database aggregates directly.
async fn post_date_totals(
    state: &AppState,
    platform: Platform,
    user_ids: &[i64],
    start: NaiveDate,
    end: NaiveDate,
    hashtag_filter: Option<&HashtagFilter>,
    req_id: &str,
) -> Result<Vec<PostDayTotal>, ApiError> {
    let mut usernames = Vec::new();
    for user_id in user_ids {
        let mut names = list_owner_usernames(&state.pool, *user_id, platform)
            .await
            .map_err(|e| map_db_error(req_id.to_string(), &e))?;
        usernames.append(&mut names);
    }
    if usernames.is_empty() {
        return Ok(Vec::new());
    }

    if let Some(filter) = hashtag_filter {
        let rows = list_posts_by_date(&state.pool, platform, &usernames, start, end)
            .await
            .map_err(|e| map_db_error(req_id.to_string(), &e))?;

        let mut per_day: std::collections::BTreeMap<NaiveDate, pulseboard_core::MetricCounts> =
            std::collections::BTreeMap::new();
        for row in rows {
            if !filter.matches(row.caption.as_deref()) {
                continue;
            }
            let slot = per_day.entry(row.day).or_default();
            *slot = slot.add(row.counts());
        }
        return Ok(per_day
            .into_iter()
            .map(|(day, counts)| PostDayTotal { day, counts })
            .collect());
    }

    let aggregates = list_post_aggregates_by_date(&state.pool, platform, &usernames, start, end)
        .await
        .map_err(|e| map_db_error(req_id.to_string(), &e))?;

    Ok(aggregates
        .into_iter()
        .map(|a| PostDayTotal {
            day: a.day,
            counts: a.counts(),
        })
        .collect())
}

fn resolve_range(query: &SeriesQuery) -> Result<(NaiveDate, NaiveDate), String> {
    if let Some(days) = query.days {
        if !(1..=MAX_RANGE_DAYS).contains(&days) {
            return Err(format!("days must be between 1 and {MAX_RANGE_DAYS}"));
        }
        let end = Utc::now().date_naive();
        return Ok((end - Duration::days(days - 1), end));
    }

    match (query.start, query.end) {
        (Some(start), Some(end)) if start <= end => {
            if (end - start).num_days() >= MAX_RANGE_DAYS {
                return Err(format!("range must be under {MAX_RANGE_DAYS} days"));
            }
            Ok((start, end))
        }
        (Some(_), Some(_)) => Err("start must not be after end".to_string()),
        _ => Err("either days or both start and end are required".to_string()),
    }
}

fn parse_user_ids(raw: &str) -> Option<Vec<i64>> {
    let ids: Vec<i64> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

fn bad_request(req_id: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(req_id.to_string(), "bad_request", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{get_json, test_app};
    use axum::http::StatusCode;
    use sqlx::PgPool;

    fn series_query() -> SeriesQuery {
        SeriesQuery {
            platform: "tiktok".to_string(),
            user_ids: "1".to_string(),
            start: None,
            end: None,
            days: None,
            mode: None,
            cutoff: None,
            mask: None,
            trim: None,
            snapshots_only: None,
            hashtags: None,
        }
    }

    #[test]
    fn parse_user_ids_accepts_comma_lists() {
        assert_eq!(parse_user_ids("1,2,3"), Some(vec![1, 2, 3]));
        assert_eq!(parse_user_ids(" 7 "), Some(vec![7]));
        assert_eq!(parse_user_ids(""), None);
        assert_eq!(parse_user_ids("1,x"), None);
    }

    #[test]
    fn resolve_range_prefers_days_preset() {
        let mut query = series_query();
        query.days = Some(7);
        query.start = Some("2020-01-01".parse().unwrap());
        query.end = Some("2020-01-02".parse().unwrap());

        let (start, end) = resolve_range(&query).expect("range");
        assert_eq!((end - start).num_days(), 6, "7 days inclusive");
        assert_eq!(end, Utc::now().date_naive());
    }

    #[test]
    fn resolve_range_rejects_inverted_and_missing_bounds() {
        let mut query = series_query();
        query.start = Some("2026-02-02".parse().unwrap());
        query.end = Some("2026-02-01".parse().unwrap());
        assert!(resolve_range(&query).is_err());

        let query = series_query();
        assert!(resolve_range(&query).is_err());
    }

    async fn seed_owner_with_snapshots(pool: &PgPool) -> i64 {
        let owner: i64 =
            sqlx::query_scalar("INSERT INTO users (display_name) VALUES ('Owner') RETURNING id")
                .fetch_one(pool)
                .await
                .expect("seed user");
        for (day, views) in [("2026-01-31", 100_i64), ("2026-02-01", 150), ("2026-02-02", 230)] {
            sqlx::query(
                "INSERT INTO social_metrics_history \
                     (user_id, platform, captured_at, views, likes, comments, shares, saves) \
                 VALUES ($1, 'tiktok', ($2 || 'T12:00:00Z')::timestamptz, $3, 0, 0, 0, 0)",
            )
            .bind(owner)
            .bind(day)
            .bind(views)
            .execute(pool)
            .await
            .expect("seed snapshot");
        }
        owner
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn series_endpoint_differences_snapshots(pool: PgPool) {
        let owner = seed_owner_with_snapshots(&pool).await;

        let uri = format!(
            "/api/v1/metrics/series?platform=tiktok&user_ids={owner}&start=2026-02-01&end=2026-02-02"
        );
        let (status, json) = get_json(test_app(pool), &uri).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["source"], "accrual");
        let series = json["data"]["series"].as_array().expect("series");
        assert_eq!(series.len(), 2);
        assert_eq!(series[0]["views"], 50);
        assert_eq!(series[1]["views"], 80);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn series_endpoint_supports_snapshots_only(pool: PgPool) {
        let owner = seed_owner_with_snapshots(&pool).await;

        let uri = format!(
            "/api/v1/metrics/series?platform=tiktok&user_ids={owner}\
             &start=2026-02-01&end=2026-02-02&snapshots_only=1"
        );
        let (status, json) = get_json(test_app(pool), &uri).await;

        assert_eq!(status, StatusCode::OK);
        let rows = json["data"].as_array().expect("snapshot rows");
        // Includes the baseline-day row fetched for differencing.
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["views"], 100);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn series_endpoint_rejects_unknown_platform(pool: PgPool) {
        let (status, json) = get_json(
            test_app(pool),
            "/api/v1/metrics/series?platform=myspace&user_ids=1&days=7",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn series_endpoint_falls_back_to_post_dates(pool: PgPool) {
        let owner: i64 =
            sqlx::query_scalar("INSERT INTO users (display_name) VALUES ('NoHistory') RETURNING id")
                .fetch_one(&pool)
                .await
                .expect("seed user");
        sqlx::query(
            "INSERT INTO social_handles (user_id, platform, username) VALUES ($1, 'tiktok', 'nh')",
        )
        .bind(owner)
        .execute(&pool)
        .await
        .expect("seed handle");
        sqlx::query(
            "INSERT INTO tiktok_posts_daily \
                 (post_id, username, posted_at, views, likes, comments, shares, saves, fetched_at) \
             VALUES ('p1', 'nh', '2026-02-01T10:00:00Z', 42, 0, 0, 0, 0, NOW())",
        )
        .execute(&pool)
        .await
        .expect("seed post");

        let uri = format!(
            "/api/v1/metrics/series?platform=tiktok&user_ids={owner}&start=2026-02-01&end=2026-02-02"
        );
        let (status, json) = get_json(test_app(pool), &uri).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["source"], "postdate");
        assert_eq!(json["data"]["series"][0]["views"], 42);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn hashtag_filter_drops_untagged_posts(pool: PgPool) {
        let owner: i64 =
            sqlx::query_scalar("INSERT INTO users (display_name) VALUES ('Campaign') RETURNING id")
                .fetch_one(&pool)
                .await
                .expect("seed user");
        sqlx::query(
            "INSERT INTO social_handles (user_id, platform, username) VALUES ($1, 'tiktok', 'camp')",
        )
        .bind(owner)
        .execute(&pool)
        .await
        .expect("seed handle");
        for (id, views, caption) in [
            ("tagged", 30_i64, "launch day #promo"),
            ("untagged", 70, "unrelated clip"),
        ] {
            sqlx::query(
                "INSERT INTO tiktok_posts_daily \
                     (post_id, username, posted_at, views, likes, comments, shares, saves, caption, fetched_at) \
                 VALUES ($1, 'camp', '2026-02-01T10:00:00Z', $2, 0, 0, 0, 0, $3, NOW())",
            )
            .bind(id)
            .bind(views)
            .bind(caption)
            .execute(&pool)
            .await
            .expect("seed post");
        }

        let uri = format!(
            "/api/v1/metrics/series?platform=tiktok&user_ids={owner}\
             &start=2026-02-01&end=2026-02-02&hashtags=promo"
        );
        let (status, json) = get_json(test_app(pool), &uri).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["source"], "postdate");
        assert_eq!(json["data"]["series"][0]["views"], 30);
    }
}
