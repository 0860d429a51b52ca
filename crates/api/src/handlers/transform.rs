//! Handlers for point transform jobs. Ids are assigned by the server.

use axum::extract::{Multipart, State};
use axum::response::Response;
use axum::Json;
use regserver_core::executor::JobRequest;
use serde::Serialize;

use crate::error::AppResult;
use crate::multipart::MultipartUpload;
use crate::response::archive_response;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// GET /transformix -- liveness check used by clients before submitting.
pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

/// POST /transformix
///
/// Accepts a multipart form with `InputPts` and `transformFiles`. Responds
/// with the zipped output directory.
pub async fn submit(State(state): State<AppState>, multipart: Multipart) -> AppResult<Response> {
    let request = JobRequest::new(None, MultipartUpload(multipart));
    let archive = state.transform.submit(request).await?;
    Ok(archive_response(archive))
}
