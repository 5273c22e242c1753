//! Archive Error Types
//!
//! Per-file compression failures and per-group upload failures are counted,
//! not raised. The kinds here cover the cases where a whole stage, or a
//! whole group, could not run.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The local archive could not be walked.
    #[display("could not read archive directory {}", _0.display())]
    Scan(#[error(not(source))] PathBuf),
    /// No usable encoder for the requested codec.
    #[display("no encoder available for {_0}")]
    NoEncoder(#[error(not(source))] String),
    /// The codec is not one the archive compresses into.
    #[display("{_0} is not an archive codec; use gzip or zstd")]
    UnsupportedCodec(#[error(not(source))] String),
    /// A single file could not be compressed. The original is intact.
    #[display("could not compress {}", _0.display())]
    Compress(#[error(not(source))] PathBuf),
    /// The remote folder of a group could not be listed.
    #[display("could not list remote folder {_0}")]
    RemoteListing(#[error(not(source))] String),
    /// The batch upload of a group could not be attempted.
    #[display("upload to {_0} failed")]
    Upload(#[error(not(source))] String),
}
