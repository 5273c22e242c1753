//! Extension and display helpers.

use crate::Compression;
use std::ffi::OsString;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl Compression {
    /// Suffix appended to a compressed file's name, dot included. Empty for
    /// [`None`](Self::None).
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Bzip2 => ".bz2",
            Compression::Gzip => ".gz",
            Compression::Zstd => ".zst",
        }
    }

    /// Name used in configuration and on the command line.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }

    /// `rlog` becomes `rlog.zst`. An existing extension is kept as part of
    /// the name, not replaced.
    #[must_use]
    pub fn append_extension(&self, path: impl AsRef<Path>) -> PathBuf {
        let mut name = OsString::from(path.as_ref());
        name.push(self.extension());
        PathBuf::from(name)
    }

    /// Whether `bytes` look like the start of a file in this format.
    #[must_use]
    pub fn check_magic_bytes(&self, bytes: &[u8]) -> bool {
        Self::from_magic_bytes(bytes) == *self
    }
}
