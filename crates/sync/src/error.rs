//! Sync Error Types
//!
//! Every kind here is fatal to one device's run and nothing more: the
//! multi-device stream reports it and moves on to the next device. Per-file
//! problems never become errors; they are counted in the device report.

use derive_more::{Display, Error};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the stage of a device run that failed.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Could not connect to or authenticate with the device.
    #[display("could not connect to device {_0}")]
    Connection(#[error(not(source))] String),
    /// The device's identity could not be read.
    #[display("could not probe device {_0}")]
    Probe(#[error(not(source))] String),
    /// Remote enumeration failed.
    #[display("could not list remote logs on {_0}")]
    Listing(#[error(not(source))] String),
    /// The transfer could not be run at all (as opposed to some files missing).
    #[display("transfer from {_0} failed")]
    Transfer(#[error(not(source))] String),
    /// Local archive or staging I/O failed.
    #[display("local archive I/O failed")]
    Io,
    /// The run was cancelled by the user.
    #[display("cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if the device could not be reached at all.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
