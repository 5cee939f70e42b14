//! HTTP endpoint modules.
//!
//! Handlers stay thin: they translate between JSON and `JobController` calls.
//! Error mapping lives here.

mod download;
mod health;
mod jobs;

use axum::http::StatusCode;
use axum::Json;
use falcon_core::FalconError;
use serde_json::{json, Value};

pub type ApiError = (StatusCode, Json<Value>);

/// Map a service error to a status code and `{"error": ...}` body.
pub(crate) fn api_error(err: FalconError) -> ApiError {
    let status = match &err {
        FalconError::NotFound(_) => StatusCode::NOT_FOUND,
        FalconError::InvalidFormat(_) | FalconError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        FalconError::AlreadyFinished(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(kind = err.kind(), error = %err, "request failed");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

// ── Re-exports ───────────────────────────────────────────────────

pub use download::download;
pub use health::health;
pub use jobs::{cancel, job_result, job_status, list_jobs, scrape};
