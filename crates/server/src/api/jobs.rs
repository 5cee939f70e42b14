//! Submit, inspect and cancel scrape jobs.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use falcon_core::{Job, JobStatus, ScrapeRequest, ScrapeResult};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{api_error, ApiError};
use crate::state::AppState;

/// POST /scrape
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<Value>, ApiError> {
    let job = state.controller.submit(request).map_err(api_error)?;
    Ok(Json(json!({
        "job_id": job.job_id,
        "status": job.status,
        "message": "Job created and queued for processing",
    })))
}

/// GET /jobs: every known job in submission order.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<Job>> {
    Json(state.controller.list())
}

/// GET /status/{job_id}
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let job = state.controller.status(job_id).map_err(api_error)?;
    let mut body = json!({
        "job_id": job.job_id,
        "status": job.status,
        "created_at": job.created_at,
        "completed_at": job.completed_at,
    });
    if job.status == JobStatus::Failed {
        body["message"] = json!(job.error_message);
    }
    if !job.status.is_terminal() {
        body["is_stuck"] = json!(state.controller.hub().is_stuck(job_id));
    }
    Ok(Json(body))
}

/// GET /result/{job_id}
pub async fn job_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ScrapeResult>, ApiError> {
    state.controller.result(job_id).map(Json).map_err(api_error)
}

/// POST /cancel/{job_id}
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let job = state.controller.cancel(job_id).map_err(api_error)?;
    Ok(Json(json!({
        "job_id": job.job_id,
        "status": job.status,
        "message": job.error_message,
    })))
}
