use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct RetriesQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct RetryItem {
    platform: String,
    username: String,
    last_error: Option<String>,
    retry_count: i32,
    next_retry_at: DateTime<Utc>,
    /// Whether the entry is already eligible for the next refresh cycle.
    due: bool,
    created_at: DateTime<Utc>,
}

pub(super) async fn list_retries(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RetriesQuery>,
) -> Result<Json<ApiResponse<Vec<RetryItem>>>, ApiError> {
    let rows = pulseboard_db::list_retries(&state.pool, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let now = Utc::now();
    let data = rows
        .into_iter()
        .map(|row| RetryItem {
            platform: row.platform,
            username: row.username,
            last_error: row.last_error,
            retry_count: row.retry_count,
            due: row.next_retry_at <= now,
            next_retry_at: row.next_retry_at,
            created_at: row.created_at,
        })
        .collect();

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}
