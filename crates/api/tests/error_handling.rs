//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server needed.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use regserver_api::error::AppError;
use regserver_core::error::JobError;
use regserver_core::task::TaskError;
use regserver_core::types::JobKind;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

// ---------------------------------------------------------------------------
// Test: Client-side failures map to 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admission_error_returns_400() {
    let err = AppError::Job(JobError::Admission("Job 3 has not been queued before".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "ADMISSION_REJECTED");
    assert_eq!(json["error"], "Job 3 has not been queued before");
}

#[tokio::test]
async fn missing_input_returns_400() {
    let err = AppError::Job(JobError::MissingInput {
        field: "fixedImage".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_UPLOAD");
    assert_eq!(json["error"], "Missing required upload part 'fixedImage'");
}

#[tokio::test]
async fn malformed_upload_returns_400() {
    let err = AppError::Job(JobError::MalformedUpload("incomplete multipart stream".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_UPLOAD");
    assert_eq!(json["error"], "Malformed upload: incomplete multipart stream");
}

// ---------------------------------------------------------------------------
// Test: Capacity and deadline errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn capacity_exceeded_returns_503() {
    let err = AppError::Job(JobError::CapacityExceeded {
        kind: JobKind::Registration,
        limit: 1,
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "CAPACITY_EXCEEDED");
}

#[tokio::test]
async fn timed_out_returns_408() {
    let err = AppError::Job(JobError::TimedOut { after_ms: 50_000 });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(json["code"], "TIMED_OUT");
    assert_eq!(json["error"], "Job timed out after 50000ms");
}

// ---------------------------------------------------------------------------
// Test: Server-side failures map to 500 with a sanitized message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn external_task_error_is_sanitized() {
    let err = AppError::Job(JobError::ExternalTask(TaskError::Exit {
        code: 2,
        stderr: "/secret/path/elastix: bad params".into(),
    }));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "EXTERNAL_TASK_FAILED");
    assert!(!json["error"].as_str().unwrap().contains("secret"));
}

#[tokio::test]
async fn packaging_error_returns_500() {
    let err = AppError::Job(JobError::Packaging("disk full".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}
