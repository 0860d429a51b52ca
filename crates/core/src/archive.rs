//! Result packaging.
//!
//! Zips a job's output directory into a single archive rooted at the
//! directory's own name, so extracting `res.zip` recreates `output/`. The
//! archive is written next to its final path as `<name>.partial` and only
//! renamed into place once the writer is finished; its reported size is
//! read after the rename.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::JobError;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Source directory {0} has no usable name")]
    UnnamedSource(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<ArchiveError> for JobError {
    fn from(err: ArchiveError) -> Self {
        JobError::Packaging(err.to_string())
    }
}

/// A finished archive on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub path: PathBuf,
    /// Exact size in bytes of the finished file.
    pub size: u64,
}

/// An archive opened for streaming to a client.
#[derive(Debug)]
pub struct ArchiveStream {
    pub file: tokio::fs::File,
    pub size: u64,
    /// Attachment name presented to the client.
    pub file_name: &'static str,
}

/// Package `source_dir` into `archive_path` on a blocking thread.
pub async fn package(source_dir: &Path, archive_path: &Path) -> Result<PackagedArchive, JobError> {
    let source_dir = source_dir.to_path_buf();
    let archive_path = archive_path.to_path_buf();
    tokio::task::spawn_blocking(move || package_dir(&source_dir, &archive_path))
        .await
        .map_err(|e| JobError::Internal(format!("Packaging task failed: {e}")))?
        .map_err(JobError::from)
}

/// Open a packaged archive for streaming.
pub async fn open(
    archive: &PackagedArchive,
    file_name: &'static str,
) -> Result<ArchiveStream, JobError> {
    let file = tokio::fs::File::open(&archive.path)
        .await
        .map_err(|e| JobError::Packaging(format!("Cannot open archive: {e}")))?;
    Ok(ArchiveStream {
        file,
        size: archive.size,
        file_name,
    })
}

/// Recursively zip `source_dir` into `archive_path`.
pub fn package_dir(source_dir: &Path, archive_path: &Path) -> Result<PackagedArchive, ArchiveError> {
    let root_name = source_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ArchiveError::UnnamedSource(source_dir.to_path_buf()))?;

    let mut partial = archive_path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let result = write_archive(source_dir, &root_name, &partial)
        .and_then(|()| std::fs::rename(&partial, archive_path).map_err(ArchiveError::from));
    if let Err(err) = result {
        let _ = std::fs::remove_file(&partial);
        return Err(err);
    }

    let size = std::fs::metadata(archive_path)?.len();
    Ok(PackagedArchive {
        path: archive_path.to_path_buf(),
        size,
    })
}

fn write_archive(source_dir: &Path, root_name: &str, target: &Path) -> Result<(), ArchiveError> {
    let file = File::create(target)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_dir(&mut zip, source_dir, root_name, options)?;

    let writer = zip.finish()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn add_dir<W: io::Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<(), ArchiveError> {
    zip.add_directory(format!("{prefix}/"), options)?;

    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = format!("{prefix}/{}", entry.file_name().to_string_lossy());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            add_dir(zip, &entry.path(), &name, options)?;
        } else if file_type.is_file() {
            let mut source = File::open(entry.path())?;
            let large = source.metadata()?.len() >= u64::from(u32::MAX);
            zip.start_file(name, options.large_file(large))?;
            io::copy(&mut source, zip)?;
        }
        // Symlinks and special files are skipped.
    }
    Ok(())
}
