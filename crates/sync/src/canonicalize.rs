//! Moving staged files into the archive under their canonical names.

use crate::error::{ErrorKind, Result};
use crate::inventory::LocalInventory;
use crate::naming::NamingScheme;
use crate::transfer::PARTIAL_DIR;
use exn::ResultExt;
use std::collections::HashSet;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Counts from one [`Canonicalizer::finalize`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Finalized {
    /// Staged files moved into the archive.
    pub moved: usize,
    /// Staged files dropped because the archive already had them.
    pub duplicates: usize,
    /// Staged paths dropped because another staged file of this pass already
    /// claimed the same canonical name.
    pub collisions: Vec<String>,
    /// Staged files that could not be moved (left in staging for next time).
    pub failed: usize,
}

/// Renames staged files into the archive of one dongle.
///
/// Never overwrites: when a canonical name is already taken, the staged copy
/// is discarded. Running it again over leftovers of an interrupted pass is
/// safe.
pub struct Canonicalizer<'a> {
    naming: &'a NamingScheme,
    dongle_id: &'a str,
}

impl<'a> Canonicalizer<'a> {
    pub fn new(naming: &'a NamingScheme, dongle_id: &'a str) -> Self {
        Self { naming, dongle_id }
    }

    /// Move everything in `staging` into `archive`, then prune the emptied
    /// staging directories.
    pub async fn finalize(&self, staging: &Path, archive: &Path) -> Result<Finalized> {
        let mut report = Finalized::default();
        let (files, directories) = match walk(staging).await {
            Ok(found) => found,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(report),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        };
        fs::create_dir_all(archive).await.or_raise(|| ErrorKind::Io)?;
        let mut existing = LocalInventory::scan(archive).await?;
        let mut moved = HashSet::new();

        for file in files {
            let Ok(relative) = file.strip_prefix(staging) else {
                continue;
            };
            let relative = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
            let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let identity = match self.naming.is_canonical(self.dongle_id, &name) {
                true => name,
                false => self.naming.canonicalize(self.dongle_id, &relative),
            };

            if moved.contains(&identity) {
                tracing::warn!(path = %relative, identity, "canonical name already claimed in this pass; dropping staged copy");
                discard(&file).await;
                report.collisions.push(relative);
                continue;
            }
            if existing.contains(&identity) {
                tracing::debug!(path = %relative, identity, "already archived; dropping staged copy");
                discard(&file).await;
                report.duplicates += 1;
                continue;
            }
            match relocate(&file, &archive.join(&identity)).await {
                Ok(()) => {
                    tracing::debug!(path = %relative, identity, "archived");
                    existing.insert(identity.clone());
                    moved.insert(identity);
                    report.moved += 1;
                },
                Err(err) => {
                    tracing::warn!(path = %relative, identity, error = %err, "could not move staged file");
                    report.failed += 1;
                },
            }
        }

        prune(directories, staging).await;
        Ok(report)
    }
}

/// Every regular file and directory beneath `root`, skipping rsync's resume
/// directories. Stale `.part` downloads are deleted on the way.
async fn walk(root: &Path) -> std::io::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut directories = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if entry.file_name() != PARTIAL_DIR {
                    directories.push(path.clone());
                    pending.push(path);
                }
            } else if file_type.is_file() {
                if is_partial_download(&path) {
                    discard(&path).await;
                } else {
                    files.push(path);
                }
            }
        }
    }
    files.sort();
    Ok((files, directories))
}

fn is_partial_download(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "part")
}

/// Rename, falling back to copy-and-delete across filesystems.
async fn relocate(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == IoErrorKind::CrossesDevices => {
            fs::copy(from, to).await?;
            fs::remove_file(from).await
        },
        Err(err) => Err(err),
    }
}

async fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %err, "could not remove staged file");
    }
}

/// Remove empty directories deepest-first. Anything that is not empty or
/// cannot be removed stays.
async fn prune(mut directories: Vec<PathBuf>, staging: &Path) {
    directories.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    directories.push(staging.to_path_buf());
    for dir in directories {
        if let Err(err) = fs::remove_dir(&dir).await {
            tracing::trace!(path = %dir.display(), error = %err, "not pruned");
        }
    }
}
