//! Top-level errors, one per stage the binary drives.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("configuration missing or invalid")]
    Config,
    #[display("could not initialise logging")]
    Logging,
    #[display("compression stage failed")]
    Compress,
    #[display("could not open upload backend")]
    Backend,
    #[display("could not read archive")]
    Archive,
}

impl ErrorKind {
    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config => 2,
            _ => 1,
        }
    }
}
