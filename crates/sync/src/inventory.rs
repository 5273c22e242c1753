//! What exists on the device, and what already exists in the archive.

use crate::error::{ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use rlogsync_compress::Compression;
use rlogsync_remote::{EntryKind, RemoteAccess};
use std::collections::HashSet;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

/// A remote log file, relative to the remote root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePathRecord {
    /// `/`-separated path beneath the remote root.
    pub relative_path: String,
    pub size: u64,
}
impl RemotePathRecord {
    pub fn new(relative_path: impl Into<String>, size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
        }
    }
}

/// Enumerates the log files below the remote root of one device.
///
/// Listing never changes the device, so it can be repeated freely.
pub struct RemoteInventory<'a> {
    remote: &'a dyn RemoteAccess,
    root: &'a str,
    marker: &'a str,
}

impl<'a> RemoteInventory<'a> {
    /// Only regular files whose name contains `marker` are reported.
    pub fn new(remote: &'a dyn RemoteAccess, root: &'a str, marker: &'a str) -> Self {
        Self { remote, root, marker }
    }

    /// Stream every matching file. The first listing failure ends the stream
    /// with a [`Listing`](ErrorKind::Listing) error.
    pub fn list(&self) -> impl Stream<Item = Result<RemotePathRecord>> + Send + 'a {
        let (remote, root, marker) = (self.remote, self.root, self.marker);
        stream! {
            for await entry in remote.walk(root) {
                match entry.or_raise(|| ErrorKind::Listing(remote.destination().to_string())) {
                    Ok(entry) if entry.kind == EntryKind::File && entry.name().contains(marker) => {
                        yield Ok(RemotePathRecord::new(entry.path, entry.size));
                    },
                    Ok(_) => {},
                    Err(err) => {
                        yield Err(err);
                        return;
                    },
                }
            }
        }
    }
}

/// Names of the canonical files already held for one dongle.
///
/// This is the single authority for "do we already have this file": a
/// canonical name is present when the archive holds it as-is, or holds it
/// with an extension the compression stage adds (`.gz`, `.zst`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalInventory {
    names: HashSet<String>,
}

impl LocalInventory {
    /// Collect the regular file names directly inside `dir`. A directory that
    /// does not exist yet is an empty archive.
    pub async fn scan(dir: &Path) -> Result<Self> {
        let mut names = HashSet::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        };
        while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::Io)? {
            if !entry.file_type().await.or_raise(|| ErrorKind::Io)?.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.insert(name);
            }
        }
        Ok(Self { names })
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.names.contains(identity)
            || Compression::ARCHIVAL
                .iter()
                .any(|format| self.names.contains(&format!("{identity}{}", format.extension())))
    }

    /// Record a newly added name. Returns `false` if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.names.insert(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for LocalInventory {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}
