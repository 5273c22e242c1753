//! Codecs for archived log segments.
//!
//! [`Compression`] names a format. It can be detected from a file name
//! ([`Compression::from_path`]) or from leading bytes, streamed through an
//! encoder ([`Compression::encode_to`]), and used to compress a segment in
//! place ([`Compression::compress_file`]). The original is only removed once
//! the compressed artifact is confirmed on disk.
//!
//! Zstd is always recognised, since `.zst` files may come from an external
//! encoder, but encoding it in-process needs the `zstd` feature.

#[cfg(feature = "cli")]
pub mod cli;
mod detect;
pub mod error;
mod file;
mod ops;
#[cfg(feature = "serde")]
mod serde;
mod util;

pub use crate::file::{CompressedFile, discard_partial, verify_replacement};

/// A supported compression format.
///
/// Defaults to [`None`](Self::None) (uncompressed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz)
    Gzip,
    /// Zstd compression (.zst)
    Zstd,
}

impl Compression {
    /// Every format with a file extension, in detection order.
    pub const COMPRESSED: [Compression; 3] = [Compression::Bzip2, Compression::Gzip, Compression::Zstd];

    /// Formats the archive compresses logs into. A `.bz2` log arrives from
    /// the device that way and is a file of its own, not a compressed copy.
    pub const ARCHIVAL: [Compression; 2] = [Compression::Gzip, Compression::Zstd];

    #[must_use]
    pub fn is_archival(&self) -> bool {
        Self::ARCHIVAL.contains(self)
    }

    /// Returns `true` if this format can be encoded and decoded in-process
    /// with the features this crate was compiled with.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        match self {
            Compression::None | Compression::Bzip2 | Compression::Gzip => true,
            Compression::Zstd => cfg!(feature = "zstd"),
        }
    }
}
