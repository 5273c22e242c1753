//! Storage Models

use std::path::PathBuf;
use time::OffsetDateTime;

/// One file in a remote listing, keyed relative to the backend root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    /// `UNIX_EPOCH` when the remote does not report one.
    pub modified: OffsetDateTime,
}

impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
        }
    }

    /// Final component of the key. The uploader matches on this alone.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}
