#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use regserver_api::config::{JobKindConfig, ServerConfig};
use regserver_api::router::build_app_router;
use regserver_api::state::AppState;
use regserver_core::task::{ExternalTask, TaskError, TaskSettings};
use regserver_core::types::ScratchPolicy;

pub const BOUNDARY: &str = "regserver-test-boundary";

/// Build a test `ServerConfig` rooted at `jobs_root`.
///
/// Registration allows one job at a time, transform two; both get a
/// five-second deadline.
pub fn test_config(jobs_root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        jobs_data_location: jobs_root.to_path_buf(),
        registration: JobKindConfig {
            max_concurrent: 1,
            timeout: Duration::from_secs(5),
            program: "elastix".into(),
            scratch: ScratchPolicy::Retain,
        },
        transform: JobKindConfig {
            max_concurrent: 2,
            timeout: Duration::from_secs(5),
            program: "transformix".into(),
            scratch: ScratchPolicy::Erase,
        },
        queue_ticket_ttl: Some(Duration::from_secs(600)),
        max_upload_bytes: 16 * 1024 * 1024,
        shutdown_timeout_secs: 5,
    }
}

/// Build the full application router with fake external tasks.
///
/// Returns the state too so tests can inspect limiters and ledgers.
pub async fn build_test_app(
    config: ServerConfig,
    registration: Arc<dyn ExternalTask>,
    transform: Arc<dyn ExternalTask>,
) -> (Router, AppState) {
    let state = AppState::with_tasks(config.clone(), registration, transform);
    state.registration.init().await.unwrap();
    state.transform.init().await.unwrap();
    (build_app_router(state.clone(), &config), state)
}

// ---------------------------------------------------------------------------
// Fake tasks
// ---------------------------------------------------------------------------

/// Writes `result.txt` into the output directory.
pub fn writing_task() -> Arc<dyn ExternalTask> {
    Arc::new(|settings: &TaskSettings, _: &CancellationToken| -> Result<(), TaskError> {
        std::fs::write(settings.output_dir().join("result.txt"), b"done").map_err(TaskError::Io)
    })
}

/// Sleeps for `duration` in small steps, bailing out when cancelled.
pub fn sleeping_task(duration: Duration) -> Arc<dyn ExternalTask> {
    Arc::new(move |settings: &TaskSettings, cancel: &CancellationToken| -> Result<(), TaskError> {
        let started = Instant::now();
        while started.elapsed() < duration {
            if cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        std::fs::write(settings.output_dir().join("result.txt"), b"slow").map_err(TaskError::Io)
    })
}

/// Exits with a non-zero status.
pub fn failing_task() -> Arc<dyn ExternalTask> {
    Arc::new(|_: &TaskSettings, _: &CancellationToken| -> Result<(), TaskError> {
        Err(TaskError::Exit {
            code: 1,
            stderr: "itk::ExceptionObject".into(),
        })
    })
}

// ---------------------------------------------------------------------------
// Multipart bodies
// ---------------------------------------------------------------------------

/// Hand-built `multipart/form-data` body.
#[derive(Default)]
pub struct MultipartBody {
    bytes: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, file_name: &str, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        self.bytes.extend_from_slice(data);
        self.bytes.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.bytes.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.bytes
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.bytes
    }
}

/// Registration form with `transforms` numbered parameter files.
pub fn registration_body(transforms: usize) -> Vec<u8> {
    let mut body = MultipartBody::new()
        .file("fixedImage", "f.img", b"fixed pixels")
        .file("movingImage", "m.img", b"moving pixels")
        .text("numberOfTransforms", &transforms.to_string());
    for i in 0..transforms {
        body = body.file(&format!("transformParam_{i}"), "p.txt", b"(Transform \"EulerTransform\")");
    }
    body.finish()
}

pub fn transform_body() -> Vec<u8> {
    MultipartBody::new()
        .file("InputPts", "points.txt", b"point\n1\n1.0 2.0 3.0\n")
        .file("transformFiles", "t.txt", b"(Transform \"EulerTransform\")")
        .finish()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_multipart(app: Router, uri: &str, body: Vec<u8>) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// POST a multipart request whose body sends `prefix` and then never ends.
pub async fn post_stalled_multipart(app: Router, uri: &str, prefix: Vec<u8>) -> Response<Body> {
    let chunks = futures::StreamExt::chain(
        futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from(prefix))]),
        futures::stream::pending(),
    );
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from_stream(chunks))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Start of a registration form, cut off inside the fixed image.
pub fn truncated_registration_body() -> Vec<u8> {
    let mut bytes = MultipartBody::new().text("numberOfTransforms", "0").finish();
    bytes.truncate(bytes.len() - format!("--{BOUNDARY}--\r\n").len());
    bytes.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"fixedImage\"; filename=\"f.img\"\r\n\r\nfirst pixels"
        )
        .as_bytes(),
    );
    bytes
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Entry names of a zip archive held in memory.
pub fn zip_entries(bytes: Vec<u8>) -> Vec<String> {
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect()
}
