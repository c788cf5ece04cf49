//! Transfer pipeline: upload each queued file, then archive it locally.
//!
//! For every item of a batch, in queue order:
//!
//! 1. Open the local file
//! 2. Upload it to `remote_working_path/<file name>`
//! 3. Rename it into the archive directory
//!
//! The rename is the only local mutation; there is no separate delete. When
//! the archive lives on another filesystem the rename falls back to copy and
//! remove.
//!
//! # Failure policy
//!
//! Failures are isolated per item:
//!
//! - A file that no longer exists, or a path already handled earlier in the
//!   same batch, is skipped.
//! - A local I/O or remote error consumes one attempt. The item is requeued
//!   until it has failed `retry_limit` times, then dead-lettered: logged and
//!   left where it is on disk.
//! - A transport error means the session is gone. The failing item and the
//!   rest of the batch are requeued without consuming attempts, and the
//!   report is flagged so the caller reconnects.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::queue::PendingFile;
use crate::transfer::{remote_path_for, TransferError, TransferSession};

/// Errors that can occur while processing a single file.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The queued path has no file name component.
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    /// The local file could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The upload failed.
    #[error("failed to upload {path}: {source}")]
    Upload {
        path: PathBuf,
        #[source]
        source: TransferError,
    },

    /// The file was uploaded but could not be moved into the archive.
    #[error("failed to archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// Returns `true` if the session is unusable after this error.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Upload { source, .. } if source.is_transport())
    }

    /// Returns `true` if the source file disappeared before it was opened.
    #[must_use]
    pub fn is_vanished(&self) -> bool {
        matches!(self, Self::Open { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Settings for the transfer pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Local archive directory.
    pub keep_dir: PathBuf,

    /// Remote directory prefix.
    pub remote_working_path: String,

    /// Attempts per file before it is dead-lettered.
    pub retry_limit: u8,
}

/// A file that was uploaded and archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferredFile {
    pub source: PathBuf,
    pub remote_path: String,
    pub archived: PathBuf,
    pub bytes: u64,
}

/// Outcome of draining one batch.
#[derive(Debug, Default, Clone)]
pub struct DrainReport {
    /// Uploaded and archived, in processing order.
    pub transferred: Vec<TransferredFile>,

    /// Duplicates and files that vanished before they were opened.
    pub skipped: Vec<PathBuf>,

    /// To be retried in a later batch.
    pub requeued: Vec<PendingFile>,

    /// Given up on after exhausting the retry limit.
    pub dead_lettered: Vec<PathBuf>,

    /// The session failed and must be re-established.
    pub session_lost: bool,
}

impl DrainReport {
    /// A report for a batch that could not be attempted because no session
    /// was available.
    #[must_use]
    pub fn unattempted(batch: Vec<PendingFile>) -> Self {
        Self {
            requeued: batch,
            session_lost: true,
            ..Self::default()
        }
    }
}

/// Uploads and archives batches of files.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Processes `batch` sequentially using `session`.
    ///
    /// Never fails as a whole; every item ends up in exactly one bucket of
    /// the returned [`DrainReport`].
    pub fn drain<S: TransferSession + ?Sized>(
        &self,
        session: &mut S,
        batch: Vec<PendingFile>,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        let mut handled: HashSet<PathBuf> = HashSet::new();
        let mut items = batch.into_iter();

        debug!(files = items.len(), "Draining batch");

        while let Some(mut item) = items.next() {
            if !handled.insert(item.path.clone()) {
                debug!(path = %item.path.display(), "Already handled in this batch, skipping");
                report.skipped.push(item.path);
                continue;
            }

            match self.transfer_one(session, &item.path) {
                Ok(done) => {
                    info!(
                        path = %done.source.display(),
                        remote_path = %done.remote_path,
                        archived = %done.archived.display(),
                        bytes = done.bytes,
                        "File transferred"
                    );
                    report.transferred.push(done);
                }
                Err(e) if e.is_vanished() => {
                    debug!(path = %item.path.display(), "File no longer exists, skipping");
                    report.skipped.push(item.path);
                }
                Err(e) if e.is_transport() => {
                    error!(error = %e, "Session failed, requeueing remainder of batch");
                    report.session_lost = true;
                    report.requeued.push(item);
                    report.requeued.extend(items);
                    break;
                }
                Err(e) => {
                    item.attempts = item.attempts.saturating_add(1);
                    if item.attempts >= self.config.retry_limit {
                        error!(
                            path = %item.path.display(),
                            attempts = item.attempts,
                            error = %e,
                            "Giving up on file, leaving it in place"
                        );
                        report.dead_lettered.push(item.path);
                    } else {
                        warn!(
                            path = %item.path.display(),
                            attempts = item.attempts,
                            error = %e,
                            "Transfer failed, will retry"
                        );
                        report.requeued.push(item);
                    }
                }
            }
        }

        report
    }

    fn transfer_one<S: TransferSession + ?Sized>(
        &self,
        session: &mut S,
        path: &Path,
    ) -> Result<TransferredFile, PipelineError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| PipelineError::NoFileName(path.to_path_buf()))?;
        let remote_path =
            remote_path_for(&self.config.remote_working_path, &file_name.to_string_lossy());

        // The handle is closed before the rename below.
        let bytes = {
            let mut file = File::open(path).map_err(|source| PipelineError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            session
                .upload(&mut file, &remote_path)
                .map_err(|source| PipelineError::Upload {
                    path: path.to_path_buf(),
                    source,
                })?
        };

        let archived =
            archive_file(path, &self.config.keep_dir).map_err(|source| PipelineError::Archive {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(TransferredFile {
            source: path.to_path_buf(),
            remote_path,
            archived,
            bytes,
        })
    }
}

/// Moves `source` into `keep_dir` and returns its new location.
///
/// If the archive already holds a file of that name, the new file gets a UTC
/// timestamp suffix instead of overwriting it. The name is chosen before the
/// rename, and `rename` replaces a file that appears at the target in
/// between; the archive directory is assumed to be written only by this
/// process. The cross-device fallback creates its target exclusively and
/// never replaces an existing file.
///
/// # Errors
///
/// Returns the rename error, or the copy fallback's error when the archive is
/// on another filesystem. A failed fallback leaves the source in place and
/// nothing behind in the archive.
pub fn archive_file(source: &Path, keep_dir: &Path) -> io::Result<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no file name")
    })?;
    let target = unique_target(keep_dir, file_name);

    match fs::rename(source, &target) {
        Ok(()) => Ok(target),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                path = %source.display(),
                keep_dir = %keep_dir.display(),
                "Archive is on another filesystem, copying"
            );
            copy_to_archive(source, keep_dir, file_name, |path: &Path| {
                fs::remove_file(path)
            })
        }
        Err(e) => Err(e),
    }
}

/// Copies `source` into `keep_dir`, then removes it with `remove_source`.
///
/// The target is created with `create_new` and deleted again if the copy or
/// the removal fails.
fn copy_to_archive<F>(
    source: &Path,
    keep_dir: &Path,
    file_name: &OsStr,
    remove_source: F,
) -> io::Result<PathBuf>
where
    F: Fn(&Path) -> io::Result<()>,
{
    let mut from = File::open(source)?;

    loop {
        let target = unique_target(keep_dir, file_name);
        let mut to = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(to) => to,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        };

        let copied = io::copy(&mut from, &mut to)
            .and_then(|_| to.sync_all())
            .and_then(|()| remove_source(source));
        drop(to);

        return match copied {
            Ok(()) => Ok(target),
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&target) {
                    warn!(
                        target = %target.display(),
                        error = %cleanup,
                        "Could not remove partial archive copy"
                    );
                }
                Err(e)
            }
        };
    }
}

/// Picks a path in `keep_dir` for `file_name` that does not exist yet.
fn unique_target(keep_dir: &Path, file_name: &OsStr) -> PathBuf {
    let plain = keep_dir.join(file_name);
    if !plain.exists() {
        return plain;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();

    let stamped = keep_dir.join(format!("{stem}-{stamp}{extension}"));
    if !stamped.exists() {
        return stamped;
    }

    (1u32..)
        .map(|n| keep_dir.join(format!("{stem}-{stamp}-{n}{extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(stamped)
}
