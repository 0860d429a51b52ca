//! Archive download responses.

use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use regserver_core::archive::ArchiveStream;
use tokio_util::io::ReaderStream;

pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Stream a finished archive as a `200 OK` zip attachment.
///
/// `Content-Length` is the size measured after the archive was finished.
pub fn archive_response(archive: ArchiveStream) -> Response {
    let headers = [
        (CONTENT_TYPE, ZIP_CONTENT_TYPE.to_string()),
        (
            CONTENT_DISPOSITION,
            format!("attachment; filename={}", archive.file_name),
        ),
        (CONTENT_LENGTH, archive.size.to_string()),
    ];
    let body = Body::from_stream(ReaderStream::new(archive.file));

    (StatusCode::OK, headers, body).into_response()
}
