use crate::task::TaskError;
use crate::types::{JobId, JobKind};

/// Everything that can end a job before (or instead of) a successful archive.
///
/// All variants are caught at the executor boundary and turned into an HTTP
/// status by the API crate; none of them take the service down.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The job id was missing, malformed, never registered, already claimed or expired.
    #[error("Admission rejected: {0}")]
    Admission(String),

    #[error("Missing required upload part '{field}'")]
    MissingInput { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// The request body broke off or was not valid multipart.
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("Too many concurrent {kind} jobs (limit {limit})")]
    CapacityExceeded { kind: JobKind, limit: usize },

    #[error("Staging failed: {0}")]
    Staging(#[source] std::io::Error),

    #[error("External task failed: {0}")]
    ExternalTask(#[from] TaskError),

    #[error("Packaging failed: {0}")]
    Packaging(String),

    #[error("Job timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    #[error("Job {0} was cancelled")]
    Cancelled(JobId),

    #[error("Internal error: {0}")]
    Internal(String),
}
