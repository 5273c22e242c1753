//! Storage Error Types

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The remote service could not be reached or timed out.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Empty, absolute outside a root, or climbing above the root with `..`.
    #[display("invalid remote key: {}", _0.display())]
    InvalidKey(#[error(not(source))] PathBuf),
    /// The program a backend shells out to is not installed.
    #[display("storage tool unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// The remote or its tool reported a failure.
    #[display("remote error: {_0}")]
    Remote(#[error(not(source))] String),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Transient failures are worth another attempt; a bad key or a missing
    /// tool will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::Remote(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Network("timeout".into()), true)]
    #[case(ErrorKind::Remote("exit status 1".into()), true)]
    #[case(ErrorKind::Io(IoError::other("disk")), true)]
    #[case(ErrorKind::NotFound(PathBuf::from("tici/D1")), false)]
    #[case(ErrorKind::InvalidKey(PathBuf::from("../D1")), false)]
    #[case(ErrorKind::Unavailable("rclone".into()), false)]
    fn retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn messages() {
        assert_eq!(ErrorKind::InvalidKey(PathBuf::from("../x")).to_string(), "invalid remote key: ../x");
        assert_eq!(ErrorKind::Unavailable("rclone".into()).to_string(), "storage tool unavailable: rclone");
    }
}
