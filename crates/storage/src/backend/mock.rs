//! In-memory storage backend for testing.

use super::{FileInfoStream, io_error};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::normalize;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// In-memory backend for tests. Uploads read the local file from disk.
///
/// ```
/// use rlogsync_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("tici/D1/D1--rlog.zst", "zstd")]);
/// assert_eq!(backend.list(Some(Path::new("tici/D1"))).await?.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    files: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
    failing: HashSet<PathBuf>,
    lists: AtomicUsize,
}

impl MockBackend {
    /// Panics on a key that does not normalise; that is a broken test.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let files = files
            .into_iter()
            .map(|(key, data)| {
                let key = key.into();
                match normalize(&key) {
                    Ok(key) => (key, data.into()),
                    Err(_) => panic!("MockBackend::with_files: invalid key {}", key.display()),
                }
            })
            .collect();
        Self {
            name: "mock".to_string(),
            files: RwLock::new(files),
            failing: HashSet::new(),
            lists: AtomicUsize::new(0),
        }
    }

    /// Every upload into folder `dest` fails with a network error.
    pub fn failing_uploads_into(mut self, dest: impl Into<PathBuf>) -> Self {
        self.failing.insert(dest.into());
        self
    }

    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Stored keys in order.
    pub async fn paths(&self) -> Vec<PathBuf> {
        self.files.read().await.keys().cloned().collect()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_files(Vec::<(PathBuf, Vec<u8>)>::new())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Box::pin(async_stream::stream! {
            let prefix = match prefix.map(normalize).transpose() {
                Ok(prefix) => prefix,
                Err(err) => {
                    yield Err(err);
                    return;
                },
            };
            // Snapshot so the lock is not held across yields.
            let matching: Vec<FileInfo> = self
                .files
                .read()
                .await
                .iter()
                .filter(|(key, _)| prefix.as_ref().is_none_or(|prefix| key.starts_with(prefix)))
                .map(|(key, data)| FileInfo::new(key.clone(), data.len() as u64, OffsetDateTime::UNIX_EPOCH))
                .collect();
            for info in matching {
                yield Ok(info);
            }
        })
    }

    async fn upload(&self, local: &Path, path: &Path) -> Result<()> {
        let key = normalize(path)?;
        if key.parent().is_some_and(|folder| self.failing.contains(folder)) {
            exn::bail!(ErrorKind::Network(format!("injected failure for {}", key.display())));
        }
        let data = tokio::fs::read(local).await.map_err(|err| io_error(err, local))?;
        self.files.write().await.insert(key, data);
        Ok(())
    }
}
