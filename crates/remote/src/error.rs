//! Remote Access Error Types

use derive_more::{Display, Error};

/// A remote access error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote access operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The host could not be reached, or the connection dropped.
    #[display("connection to {_0} failed")]
    Connection(#[error(not(source))] String),
    /// The host was reached but refused our credentials or host key.
    #[display("authentication with {_0} failed")]
    Authentication(#[error(not(source))] String),
    /// A remote command ran but exited unsuccessfully.
    #[display("remote command failed: {_0}")]
    CommandFailed(#[error(not(source))] String),
    /// The remote path does not exist.
    #[display("remote path not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Remote output could not be understood.
    #[display("unexpected remote output: {_0}")]
    Protocol(#[error(not(source))] String),
    /// The local client program could not be started.
    #[display("program unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// A local I/O operation failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// The session is unusable after this; further commands will fail too.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Authentication(_) | Self::Unavailable(_))
    }
}
