//! Blocking directory walks over the local archive.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

/// One regular file found under an archive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Found {
    pub path: PathBuf,
    pub size: u64,
}

/// Every regular file below `root`, sorted by path. Hidden directories
/// (staging areas, partial transfers) are not entered. A missing `root` has
/// no files.
pub(crate) async fn files(root: &Path) -> Result<Vec<Found>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound && dir == root => return Ok(found),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Scan(dir)),
        };
        while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::Scan(dir.clone()))? {
            let file_type = entry.file_type().await.or_raise(|| ErrorKind::Scan(entry.path()))?;
            if file_type.is_dir() {
                if !is_hidden(&entry.file_name()) {
                    pending.push(entry.path());
                }
            } else if file_type.is_file() {
                let size = entry.metadata().await.or_raise(|| ErrorKind::Scan(entry.path()))?.len();
                found.push(Found { path: entry.path(), size });
            }
        }
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

/// Immediate, non-hidden subdirectories of `dir`, sorted by name.
pub(crate) async fn subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(dirs),
        Err(err) => return Err(err).or_raise(|| ErrorKind::Scan(dir.to_path_buf())),
    };
    while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::Scan(dir.to_path_buf()))? {
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        if let (true, Ok(name)) = (is_dir, entry.file_name().into_string())
            && !name.starts_with('.')
        {
            dirs.push((name, entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_hidden_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tici/D1/.staging/a")).unwrap();
        std::fs::write(dir.path().join("tici/D1/.staging/a/rlog"), "x").unwrap();
        std::fs::write(dir.path().join("tici/D1/D1--rlog"), "abc").unwrap();
        let found = files(dir.path()).await.unwrap();
        assert_eq!(
            found,
            vec![Found {
                path: dir.path().join("tici/D1/D1--rlog"),
                size: 3
            }]
        );
        assert_eq!(subdirs(&dir.path().join("tici")).await.unwrap(), vec![("D1".to_string(), dir.path().join("tici/D1"))]);
    }

    #[tokio::test]
    async fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(files(&dir.path().join("nope")).await.unwrap().is_empty());
        assert!(subdirs(&dir.path().join("nope")).await.unwrap().is_empty());
    }
}
