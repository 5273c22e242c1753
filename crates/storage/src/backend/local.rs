//! Local filesystem storage backend.

use crate::backend::{FileInfoStream, io_error};
use crate::error::{ErrorKind, Result};
use crate::path::normalize;
use crate::{FileInfo, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Archive copied into a directory: a mounted disk, a NAS share.
///
/// ```no_run
/// use rlogsync_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("nas", "/mnt/nas/rlogs")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}

impl LocalBackend {
    /// `root` must be absolute. It is created if missing.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidKey(root));
        }
        // Blocking, but only once at startup.
        std::fs::create_dir_all(&root).map_err(|err| io_error(err, &root))?;
        Ok(Self { name: name.into(), root })
    }

    fn resolve(&self, key: &Path) -> Result<PathBuf> {
        Ok(self.root.join(normalize(key)?))
    }

    /// Walk `dir`, pushing subdirectories onto `pending` and returning the
    /// files found directly inside it.
    async fn read_level(&self, dir: &Path, pending: &mut Vec<PathBuf>) -> Result<Vec<FileInfo>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if matches!(err.kind(), IoErrorKind::NotFound | IoErrorKind::NotADirectory) => return Ok(Vec::new()),
            Err(err) => exn::bail!(io_error(err, dir)),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|err| io_error(err, dir))? {
            let path = entry.path();
            let metadata = entry.metadata().await.map_err(|err| io_error(err, &path))?;
            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            // Broken symlinks and sockets are not part of an archive.
            if !metadata.is_file() {
                continue;
            }
            let Ok(key) = path.strip_prefix(&self.root) else { continue };
            let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
            files.push(FileInfo::new(key, metadata.len(), modified));
        }
        Ok(files)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        Box::pin(stream! {
            let start = match prefix.map(|prefix| self.resolve(prefix)).transpose() {
                Ok(start) => start.unwrap_or_else(|| self.root.clone()),
                Err(err) => {
                    yield Err(err);
                    return;
                },
            };
            // A prefix that names a folder is walked from that folder, so
            // `tici/D1` never picks up `tici/D1_part2`.
            let mut pending = vec![start];
            while let Some(dir) = pending.pop() {
                match self.read_level(&dir, &mut pending).await {
                    Ok(files) => for file in files { yield Ok(file) },
                    Err(err) => yield Err(err),
                }
            }
        })
    }

    async fn upload(&self, local: &Path, path: &Path) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(folder) = target.parent() {
            fs::create_dir_all(folder).await.map_err(|err| io_error(err, path))?;
        }
        fs::copy(local, &target).await.map_err(|err| io_error(err, local))?;
        Ok(())
    }
}
