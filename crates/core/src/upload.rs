//! Multipart uploads, consumed part by part.
//!
//! The HTTP layer implements [`UploadBody`] over its request body. The
//! executor drains it into an [`UploadSink`] only after the job holds a slot,
//! so file parts stream straight into the job directory and nothing larger
//! than a short text field is ever held in memory.
//!
//! [`UploadForm`] is an in-memory body for callers that already hold every
//! part.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::JobError;
use crate::staging::StagingArea;
use crate::types::{InputRole, JobId, JobKind, NUMBER_OF_TRANSFORMS_FIELD};

/// Longest accepted value of a text field such as `numberOfTransforms`.
pub const MAX_TEXT_FIELD_BYTES: u64 = 1024;

/// Source of multipart parts, read in body order.
#[async_trait]
pub trait UploadBody: Send + 'static {
    /// Feed every part to `sink`, stopping at the first error.
    async fn drain(self: Box<Self>, sink: &mut UploadSink<'_>) -> Result<(), JobError>;
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Receives the parts of one job's upload.
///
/// Parts for an upload role of the job's kind go to disk. Text fields the
/// kind reads are buffered up to [`MAX_TEXT_FIELD_BYTES`]. Anything else is
/// read and dropped.
pub struct UploadSink<'a> {
    kind: JobKind,
    job_id: JobId,
    staging: &'a StagingArea,
    received: ReceivedUpload,
}

impl<'a> UploadSink<'a> {
    pub fn new(kind: JobKind, job_id: JobId, staging: &'a StagingArea) -> Self {
        Self {
            kind,
            job_id,
            staging,
            received: ReceivedUpload::default(),
        }
    }

    /// Consume one part named `name`.
    pub async fn accept<R>(
        &mut self,
        name: &str,
        file_name: Option<&str>,
        reader: &mut R,
    ) -> Result<(), JobError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        if let Some(role) = InputRole::from_field_name(name).filter(|r| r.is_upload_for(self.kind)) {
            if self.received.files.contains_key(&role) {
                return Err(duplicate(name));
            }
            let path = self
                .staging
                .stage_upload(self.job_id, role, file_name, reader)
                .await?;
            self.received.files.insert(role, path);
            return Ok(());
        }

        if text_fields(self.kind).contains(&name) {
            if self.received.fields.contains_key(name) {
                return Err(duplicate(name));
            }
            let value = read_text(name, reader).await?;
            self.received.fields.insert(name.to_string(), value);
            return Ok(());
        }

        let skipped = tokio::io::copy(reader, &mut tokio::io::sink())
            .await
            .map_err(|e| JobError::MalformedUpload(e.to_string()))?;
        tracing::debug!(job_id = self.job_id, field = name, bytes = skipped, "Ignored upload part");
        Ok(())
    }

    pub fn finish(self) -> ReceivedUpload {
        self.received
    }
}

fn text_fields(kind: JobKind) -> &'static [&'static str] {
    match kind {
        JobKind::Registration => &[NUMBER_OF_TRANSFORMS_FIELD],
        JobKind::Transform => &[],
    }
}

fn duplicate(name: &str) -> JobError {
    JobError::InvalidField {
        field: name.into(),
        reason: "sent more than once".into(),
    }
}

async fn read_text<R>(name: &str, reader: &mut R) -> Result<String, JobError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut raw = Vec::new();
    reader
        .take(MAX_TEXT_FIELD_BYTES + 1)
        .read_to_end(&mut raw)
        .await
        .map_err(|e| JobError::MalformedUpload(e.to_string()))?;
    if raw.len() as u64 > MAX_TEXT_FIELD_BYTES {
        return Err(JobError::InvalidField {
            field: name.into(),
            reason: format!("longer than {MAX_TEXT_FIELD_BYTES} bytes"),
        });
    }
    String::from_utf8(raw)
        .map(|s| s.trim().to_string())
        .map_err(|_| JobError::InvalidField {
            field: name.into(),
            reason: "not valid UTF-8".into(),
        })
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Everything an upload left behind: staged paths by role and text fields.
#[derive(Debug, Default)]
pub struct ReceivedUpload {
    files: HashMap<InputRole, PathBuf>,
    fields: HashMap<String, String>,
}

impl ReceivedUpload {
    pub fn path(&self, role: InputRole) -> Option<&PathBuf> {
        self.files.get(&role)
    }

    /// Staged path of a required role.
    pub fn require(&self, role: InputRole) -> Result<PathBuf, JobError> {
        self.path(role).cloned().ok_or_else(|| JobError::MissingInput {
            field: role.field_name().unwrap_or_else(|| format!("{role:?}")),
        })
    }

    /// Number of `transformParam_<i>` parts received, whatever their index.
    pub fn transform_param_count(&self) -> usize {
        self.files
            .keys()
            .filter(|role| matches!(role, InputRole::TransformParam(_)))
            .count()
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// A required text field parsed as a non-negative integer.
    pub fn parse_count(&self, name: &str) -> Result<usize, JobError> {
        let raw = self.text(name).ok_or_else(|| JobError::MissingInput {
            field: name.into(),
        })?;
        raw.parse::<usize>().map_err(|e| JobError::InvalidField {
            field: name.into(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory body
// ---------------------------------------------------------------------------

/// One named part of a multipart request.
#[derive(Debug, Clone, Default)]
pub struct UploadPart {
    /// File name the client sent, if the part was a file. Only its extension is ever used.
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

impl UploadPart {
    pub fn file(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            data: data.into(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            file_name: None,
            data: value.into().into_bytes(),
        }
    }
}

/// Fully buffered upload. Parts are drained in field-name order.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    parts: HashMap<String, UploadPart>,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a part. A repeated field name replaces the earlier part.
    pub fn insert(&mut self, name: impl Into<String>, part: UploadPart) {
        self.parts.insert(name.into(), part);
    }

    pub fn with_part(mut self, name: impl Into<String>, part: UploadPart) -> Self {
        self.insert(name, part);
        self
    }
}

#[async_trait]
impl UploadBody for UploadForm {
    async fn drain(self: Box<Self>, sink: &mut UploadSink<'_>) -> Result<(), JobError> {
        let mut parts = self.parts.into_iter().collect::<Vec<_>>();
        parts.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, part) in parts {
            sink.accept(&name, part.file_name.as_deref(), &mut part.data.as_slice())
                .await?;
        }
        Ok(())
    }
}
