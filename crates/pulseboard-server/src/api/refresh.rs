use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use pulseboard_core::Platform;
use pulseboard_ingest::{IngestError, RefreshSummary};
use serde::Deserialize;

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct RefreshQuery {
    /// Position in the sorted handle list to resume from.
    pub offset: Option<usize>,
    /// Handles per batch; defaults to the configured batch size.
    pub batch: Option<usize>,
}

/// Runs one orchestrator batch. Callers poll with the returned
/// `next_offset` until `remaining` reaches zero.
pub(super) async fn run_refresh_batch(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(platform): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<ApiResponse<RefreshSummary>>, ApiError> {
    let platform: Platform = platform
        .parse()
        .map_err(|_| ApiError::new(req_id.0.clone(), "bad_request", format!("unknown platform '{platform}'")))?;

    let summary = state
        .refresher
        .run_batch(platform, query.offset.unwrap_or(0), query.batch, "api")
        .await
        .map_err(|e| map_ingest_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: summary,
        meta: ResponseMeta::new(req_id.0),
    }))
}

fn map_ingest_error(request_id: String, error: &IngestError) -> ApiError {
    tracing::error!(error = %error, "refresh batch failed");
    match error {
        IngestError::MissingKeyPool { .. } => {
            ApiError::new(request_id, "validation_error", error.to_string())
        }
        IngestError::Scrape(_) => {
            ApiError::new(request_id, "upstream_error", "scraper provider unavailable")
        }
        IngestError::Db(_) => ApiError::new(request_id, "internal_error", "database query failed"),
    }
}
