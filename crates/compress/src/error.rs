//! Compression Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The codec library refused to set up a stream.
    Encoder,
    #[display("input is not valid for this format")]
    InvalidData,
    #[display("unsupported format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// Known, but this build cannot encode it.
    #[display("{_0} support was not compiled in")]
    DisabledFormat(#[error(not(source))] String),
    /// The compressed output path is already occupied; nothing was written.
    #[display("target already exists: {}", _0.display())]
    TargetExists(#[error(not(source))] PathBuf),
    /// The compressed artifact could not be confirmed on disk after encoding.
    #[display("compressed output failed verification: {}", _0.display())]
    Verification(#[error(not(source))] PathBuf),
    #[display("I/O error")]
    Io,
}
