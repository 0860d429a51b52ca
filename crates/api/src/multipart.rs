//! Multipart request bodies as job uploads.
//!
//! [`MultipartUpload`] hands each part of an axum [`Multipart`] body to the
//! executor's sink as a byte stream, so nothing is read from the socket until
//! the job has been admitted and holds a slot. Parts without a field name are
//! skipped.

use std::io;

use async_trait::async_trait;
use axum::extract::Multipart;
use futures::TryStreamExt;
use regserver_core::error::JobError;
use regserver_core::upload::{UploadBody, UploadSink};
use tokio_util::io::StreamReader;

pub struct MultipartUpload(pub Multipart);

#[async_trait]
impl UploadBody for MultipartUpload {
    async fn drain(self: Box<Self>, sink: &mut UploadSink<'_>) -> Result<(), JobError> {
        let MultipartUpload(mut multipart) = *self;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| JobError::MalformedUpload(e.to_string()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let file_name = field.file_name().map(str::to_string);

            let mut reader = StreamReader::new(Box::pin(field.map_err(io::Error::other)));
            sink.accept(&name, file_name.as_deref(), &mut reader).await?;
        }

        Ok(())
    }
}
