//! Storage backends: a local directory, any `rclone` remote, and
//! S3-compatible object stores behind the `s3` feature.

mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod rclone;
mod ro;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockBackend;
pub use self::rclone::RcloneBackend;
pub use self::ro::ReadOnlyBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;

type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Concurrency and retry limits for one [`StorageBackend::upload_batch`].
///
/// `rclone` receives all of them as flags. The built-in fan-out only looks
/// at `transfers` and `retries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub transfers: usize,
    pub checkers: usize,
    pub retries: u32,
    pub low_level_retries: u32,
    pub tps_limit: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            transfers: 16,
            checkers: 16,
            retries: 3,
            low_level_retries: 10,
            tps_limit: 100,
        }
    }
}

/// Local files of a batch, split by whether they reached the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub uploaded: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// A destination for archive folders.
///
/// Remote keys are relative to the backend root and are normalised with
/// [`normalize_key`](crate::normalize_key) before use. Local sources are
/// plain filesystem paths.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &str;

    /// Every file under `prefix`, collected.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Files under `prefix`, recursively.
    ///
    /// Matching is per component: `tici/D1` does not match
    /// `tici/D1_part2/...`. A prefix nothing lives under yields an empty
    /// stream.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Copy the local file `local` to the key `path`, creating parent
    /// folders as needed.
    async fn upload(&self, local: &Path, path: &Path) -> Result<()>;

    /// Copy `files` into the folder `dest` under their own names.
    ///
    /// Files that fail individually land in [`BatchOutcome::failed`]. `Err`
    /// is reserved for a batch that could not be attempted at all.
    async fn upload_batch(&self, files: &[PathBuf], dest: &Path, options: &BatchOptions) -> Result<BatchOutcome> {
        Ok(upload_each(self, files, dest, options).await)
    }
}

async fn upload_each<B: StorageBackend + ?Sized>(
    backend: &B,
    files: &[PathBuf],
    dest: &Path,
    options: &BatchOptions,
) -> BatchOutcome {
    let results: Vec<(PathBuf, bool)> = futures::stream::iter(files.to_vec())
        .map(|local: PathBuf| async move {
            let Some(name) = local.file_name() else {
                tracing::warn!(backend = backend.name(), path = %local.display(), "not a file, skipped");
                return (local, false);
            };
            let ok = upload_with_retry(backend, &local, &dest.join(name), options.retries).await;
            (local, ok)
        })
        .buffer_unordered(options.transfers.max(1))
        .collect()
        .await;

    let (uploaded, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(|(_, ok)| *ok);
    let sorted = |mut paths: Vec<PathBuf>| {
        paths.sort();
        paths
    };
    BatchOutcome {
        uploaded: sorted(uploaded.into_iter().map(|(path, _)| path).collect()),
        failed: sorted(failed.into_iter().map(|(path, _)| path).collect()),
    }
}

async fn upload_with_retry<B: StorageBackend + ?Sized>(backend: &B, local: &Path, key: &Path, retries: u32) -> bool {
    let mut attempt = 0;
    loop {
        match backend.upload(local, key).await {
            Ok(()) => return true,
            Err(err) if err.is_retryable() && attempt < retries => {
                attempt += 1;
                tracing::debug!(backend = backend.name(), key = %key.display(), attempt, error = %err, "retrying upload");
            },
            Err(err) => {
                tracing::warn!(backend = backend.name(), key = %key.display(), error = %err, "upload failed");
                return false;
            },
        }
    }
}

fn io_error(err: IoError, path: &Path) -> ErrorKind {
    match err.kind() {
        IoErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        IoErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
        _ => ErrorKind::Io(err),
    }
}
