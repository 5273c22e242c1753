//! Read-only wrapper around another backend.
//!
//! Listings pass through. Uploads are logged and reported as successful
//! without touching the wrapped backend.

use crate::backend::{BatchOptions, BatchOutcome, FileInfoStream};
use crate::error::Result;
use crate::{BackendHandle, StorageBackend};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Dry-run wrapper: listings reach the wrapped backend, uploads are logged
/// and reported as successful without touching it.
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}

impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        self.inner.list_stream(prefix)
    }

    async fn upload(&self, local: &Path, path: &Path) -> Result<()> {
        tracing::info!(source = %local.display(), key = %path.display(), "dry run: would upload");
        Ok(())
    }

    async fn upload_batch(&self, files: &[PathBuf], dest: &Path, _options: &BatchOptions) -> Result<BatchOutcome> {
        for file in files {
            tracing::info!(source = %file.display(), dest = %dest.display(), "dry run: would upload");
        }
        Ok(BatchOutcome {
            uploaded: files.to_vec(),
            failed: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn listings_pass_through_uploads_do_not() {
        let inner = Arc::new(MockBackend::with_files([("tici/D1/D1--rlog.zst", "x")]));
        let backend = ReadOnlyBackend::new(inner.clone());
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("D1|a--rlog.zst");
        std::fs::write(&local, b"zstd").unwrap();

        backend.upload(&local, Path::new("tici/D1/D1|a--rlog.zst")).await.unwrap();
        let outcome = backend
            .upload_batch(std::slice::from_ref(&local), Path::new("tici/D1"), &BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.uploaded, vec![local]);
        assert_eq!(inner.paths().await, vec![PathBuf::from("tici/D1/D1--rlog.zst")]);
        assert_eq!(backend.list(Some(Path::new("tici/D1"))).await.unwrap().len(), 1);
        assert_eq!(backend.name(), "mock");
    }
}
