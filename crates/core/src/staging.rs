//! Per-job scratch directories.
//!
//! Layout under a kind's root:
//!
//! ```text
//! <root>/job_<id>/fixed.<ext>
//! <root>/job_<id>/moving.<ext>
//! <root>/job_<id>/transform_<i>.<ext>
//! <root>/job_<id>/output/
//! <root>/job_<id>/res.zip
//! ```
//!
//! Every path handed to later stages comes from [`StagingArea::path_for`].
//! Client-supplied names only contribute a sanitized extension.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::JobError;
use crate::types::{InputRole, JobId};

/// Longest extension component kept from an uploaded file name.
const MAX_EXTENSION_LEN: usize = 8;

const COPY_BUFFER_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist yet.
    ///
    /// Safe to call concurrently: a directory created by someone else in the
    /// meantime is not an error.
    pub async fn ensure_root(&self) -> Result<(), JobError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(JobError::Staging)
    }

    pub fn job_dir(&self, job_id: JobId) -> PathBuf {
        self.root.join(format!("job_{job_id}"))
    }

    /// Deterministic location of `role` for `job_id`. No filesystem access.
    pub fn path_for(&self, job_id: JobId, role: InputRole) -> PathBuf {
        self.job_dir(job_id).join(role.file_stem())
    }

    /// Create the job directory (idempotent) and return it.
    pub async fn ensure_job_dir(&self, job_id: JobId) -> Result<PathBuf, JobError> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(JobError::Staging)?;
        Ok(dir)
    }

    /// Create the job's output directory (idempotent) and return it.
    pub async fn ensure_output_dir(&self, job_id: JobId) -> Result<PathBuf, JobError> {
        let dir = self.path_for(job_id, InputRole::Output);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(JobError::Staging)?;
        Ok(dir)
    }

    /// Stream one uploaded part for `role` into the job directory.
    ///
    /// Only the extension of the client's `file_name` is kept, and only if
    /// it passes [`sanitized_extension`].
    pub async fn stage_upload<R>(
        &self,
        job_id: JobId,
        role: InputRole,
        file_name: Option<&str>,
        reader: &mut R,
    ) -> Result<PathBuf, JobError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let extension = file_name.and_then(sanitized_extension);
        self.stage_reader(job_id, role, extension.as_deref(), reader)
            .await
    }

    /// Copy `reader` to the path of `role`, with an optional extension.
    ///
    /// A failing read is the client's fault ([`JobError::MalformedUpload`]);
    /// a failing write is ours ([`JobError::Staging`]).
    pub async fn stage_reader<R>(
        &self,
        job_id: JobId,
        role: InputRole,
        extension: Option<&str>,
        reader: &mut R,
    ) -> Result<PathBuf, JobError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.ensure_job_dir(job_id).await?;

        let mut path = self.path_for(job_id, role);
        if let Some(ext) = extension {
            path.set_extension(ext);
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(JobError::Staging)?;
        let mut buf = vec![0u8; COPY_BUFFER_LEN];
        let mut written = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| JobError::MalformedUpload(e.to_string()))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await.map_err(JobError::Staging)?;
            written += n as u64;
        }
        file.flush().await.map_err(JobError::Staging)?;

        tracing::debug!(job_id, ?role, bytes = written, path = %path.display(), "Staged upload");
        Ok(path)
    }

    /// Remove the whole job directory. A directory that is already gone is fine.
    pub async fn erase_job_dir(&self, job_id: JobId) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(self.job_dir(job_id)).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Extension of an uploaded file name, if it is safe to reuse.
///
/// Accepts short ASCII-alphanumeric components only. A trailing `gz` keeps
/// the component before it (`nii.gz`).
fn sanitized_extension(file_name: &str) -> Option<String> {
    let valid = |s: &str| {
        !s.is_empty() && s.len() <= MAX_EXTENSION_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
    };

    let base = file_name.rsplit(['/', '\\']).next()?;
    let mut parts = base.split('.').skip(1).collect::<Vec<_>>();
    let last = parts.pop().filter(|s| valid(s))?;

    if last.eq_ignore_ascii_case("gz") {
        if let Some(inner) = parts.pop().filter(|s| valid(s)) {
            return Some(format!("{inner}.{last}"));
        }
    }
    Some(last.to_string())
}
