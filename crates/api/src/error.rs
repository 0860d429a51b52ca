use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use regserver_core::error::JobError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`JobError`] for pipeline errors and adds an internal catch-all.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A job pipeline error from `regserver_core`.
    #[error(transparent)]
    Job(#[from] JobError),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Job(job) => classify_job_error(job),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a pipeline error into an HTTP status, error code, and message.
///
/// - Admission and malformed uploads map to 400.
/// - A full concurrency ceiling maps to 503; the client should retry later.
/// - A deadline overrun maps to 408.
/// - Everything else maps to 500 with a sanitized message.
fn classify_job_error(err: &JobError) -> (StatusCode, &'static str, String) {
    match err {
        JobError::Admission(msg) => (StatusCode::BAD_REQUEST, "ADMISSION_REJECTED", msg.clone()),
        JobError::MissingInput { .. }
        | JobError::InvalidField { .. }
        | JobError::MalformedUpload(_) => {
            (StatusCode::BAD_REQUEST, "INVALID_UPLOAD", err.to_string())
        }
        JobError::CapacityExceeded { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "CAPACITY_EXCEEDED",
            err.to_string(),
        ),
        JobError::TimedOut { .. } => (StatusCode::REQUEST_TIMEOUT, "TIMED_OUT", err.to_string()),
        JobError::ExternalTask(_) => {
            tracing::error!(error = %err, "External task error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXTERNAL_TASK_FAILED",
                "The computation failed".to_string(),
            )
        }
        JobError::Staging(_)
        | JobError::Packaging(_)
        | JobError::Cancelled(_)
        | JobError::Internal(_) => {
            tracing::error!(error = %err, "Job pipeline error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
