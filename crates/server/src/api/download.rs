use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use falcon_core::{FalconError, JobStatus};
use uuid::Uuid;

use super::{api_error, ApiError};
use crate::processor::ExportFormat;
use crate::state::AppState;

/// GET /download/{job_id}/{format}
///
/// Artifacts exist only for completed jobs; anything else is a 404.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path((job_id, format)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let job = state.controller.status(job_id).map_err(api_error)?;
    if job.status != JobStatus::Completed {
        return Err(api_error(FalconError::not_found(format!("result for job {job_id}"))));
    }
    let format: ExportFormat = format.parse().map_err(api_error)?;

    let path = state.controller.processor().artifact_path(job_id, format);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(api_error(FalconError::not_found(format!(
                "{} export for job {job_id}",
                format.extension()
            ))));
        }
        Err(e) => return Err(api_error(e.into())),
    };

    let disposition = format!("attachment; filename=\"falcon_parse_result.{}\"", format.extension());
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
