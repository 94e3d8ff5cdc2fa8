use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::ingest_run::IngestRun;
use crate::models::job::{JobPosting, JobSource, JobStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
}

/// PUT /api/v1/admin/jobs/{source}/{source_id}/status
///
/// Moderation by source identity. The decision survives re-ingestion.
pub async fn set_status(
    State(state): State<AppState>,
    Path((source, source_id)): Path<(String, String)>,
    Json(input): Json<StatusUpdate>,
) -> Result<Json<JobPosting>, AppError> {
    let source: JobSource = source.parse().map_err(AppError::BadRequest)?;
    let job = state
        .engine
        .set_status(source, &source_id, input.status)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No {source} posting '{source_id}'")))?;
    state.cache.invalidate_all().await;
    Ok(Json(job))
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub removed: u64,
}

/// POST /api/v1/admin/cache/invalidate
pub async fn invalidate_cache(State(state): State<AppState>) -> Json<InvalidateResponse> {
    let removed = state.cache.invalidate_all().await;
    Json(InvalidateResponse { removed })
}

#[derive(Debug, Deserialize)]
pub struct RunFilters {
    pub source: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/v1/admin/runs
pub async fn runs(
    State(state): State<AppState>,
    Query(filters): Query<RunFilters>,
) -> Result<Json<Vec<IngestRun>>, AppError> {
    let source = match filters.source.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<JobSource>().map_err(AppError::BadRequest)?),
        None => None,
    };
    let limit = filters.limit.unwrap_or(20).clamp(1, 100);
    let runs = state
        .store
        .recent_runs(source.as_ref().map(JobSource::as_str), limit)
        .await?;
    Ok(Json(runs))
}
