//! Handlers for image registration jobs.
//!
//! Registration is two-phase: `POST /elastix/queue` hands out a job id, and
//! the upload request `POST /elastix?id=<id>` claims it. The id is read from
//! the query so the job can be admitted before any of the body is read.

use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use regserver_core::executor::JobRequest;
use regserver_core::types::JobId;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::multipart::MultipartUpload;
use crate::response::archive_response;
use crate::state::AppState;

/// The `?id=` query parameter. Missing ids are rejected at admission.
#[derive(Debug, Deserialize)]
pub struct JobIdQuery {
    pub id: Option<String>,
}

/// Response of `POST /elastix/queue`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTicket {
    pub job_id: JobId,
}

/// POST /elastix/queue
///
/// Register a new registration job id. The id must be used by exactly one
/// subsequent upload before the ticket expires.
pub async fn enqueue(State(state): State<AppState>) -> AppResult<(StatusCode, Json<QueueTicket>)> {
    let ledger = state
        .registration
        .admission()
        .ledger()
        .ok_or_else(|| AppError::InternalError("Registration jobs have no admission ledger".into()))?;

    let purged = ledger.purge_expired();
    if purged > 0 {
        tracing::debug!(purged, "Dropped expired registration tickets");
    }

    let job_id = ledger.register();
    tracing::info!(job_id, "Registration job queued");
    Ok((StatusCode::CREATED, Json(QueueTicket { job_id })))
}

/// POST /elastix
///
/// Accepts a multipart form with `fixedImage`, `movingImage`, an optional
/// `initialTransform`, `numberOfTransforms` and `transformParam_0..N-1`.
/// Responds with the zipped output directory.
pub async fn submit(
    State(state): State<AppState>,
    Query(query): Query<JobIdQuery>,
    multipart: Multipart,
) -> AppResult<Response> {
    let request = JobRequest::new(query.id, MultipartUpload(multipart));
    let archive = state.registration.submit(request).await?;
    Ok(archive_response(archive))
}
