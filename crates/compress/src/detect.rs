//! Telling formats apart: by name, by file extension, by leading bytes.

use crate::Compression;
use crate::error::{Error, ErrorKind};
use std::path::Path;
use std::str::FromStr;

/// Leading bytes of each compressed format.
const SIGNATURES: [(Compression, &[u8]); 3] = [
    (Compression::Bzip2, b"BZh"),
    (Compression::Gzip, &[0x1F, 0x8B]),
    (Compression::Zstd, &[0x28, 0xB5, 0x2F, 0xFD]),
];

/// Accepts the codec name or its file extension, in any case.
impl FromStr for Compression {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim_start_matches('.').to_ascii_lowercase();
        if wanted == Compression::None.as_str() {
            return Ok(Compression::None);
        }
        match Self::COMPRESSED
            .into_iter()
            .find(|format| format.as_str() == wanted || format.extension().trim_start_matches('.') == wanted)
        {
            Some(format) => Ok(format),
            None => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl Compression {
    /// The format a file is in, judging by its extension. Anything without a
    /// known extension is uncompressed.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let Some(ext) = path.as_ref().extension().and_then(|ext| ext.to_str()) else {
            return Compression::None;
        };
        Self::COMPRESSED
            .into_iter()
            .find(|format| format.extension()[1..].eq_ignore_ascii_case(ext))
            .unwrap_or(Compression::None)
    }

    /// The format whose signature `bytes` starts with, or `None`.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        SIGNATURES
            .into_iter()
            .find(|(_, signature)| bytes.starts_with(signature))
            .map_or(Compression::None, |(format, _)| format)
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case("none", Compression::None)]
    #[case("bz2", Compression::Bzip2)]
    #[case("BZIP2", Compression::Bzip2)]
    #[case("gzip", Compression::Gzip)]
    #[case(".gz", Compression::Gzip)]
    #[case("zst", Compression::Zstd)]
    #[case("Zstd", Compression::Zstd)]
    fn codec_names(#[case] name: &str, #[case] expected: Compression) {
        assert_eq!(name.parse::<Compression>().unwrap(), expected);
    }

    #[rstest]
    #[case("lz4")]
    #[case("xz")]
    #[case("")]
    fn unknown_codec_names(#[case] name: &str) {
        assert!(name.parse::<Compression>().is_err());
    }

    #[rstest]
    #[case("D1|a|b--rlog", Compression::None)]
    #[case("D1|a|b--rlog.part", Compression::None)]
    // A dotfile has no extension.
    #[case(".bz2", Compression::None)]
    #[case("D1|a|b--rlog.bz2", Compression::Bzip2)]
    #[case("tici/D1/D1--rlog.gz", Compression::Gzip)]
    #[case("D1--rlog.ZST", Compression::Zstd)]
    fn formats_by_extension(#[case] path: &str, #[case] expected: Compression) {
        assert_eq!(Compression::from_path(path), expected);
    }

    #[rstest]
    #[case(b"\x00\x01rlog capnp", Compression::None)]
    #[case(b"", Compression::None)]
    #[case(b"BZh91AY", Compression::Bzip2)]
    #[case(&[0x1F, 0x8B, 0x08, 0x00], Compression::Gzip)]
    #[case(&[0x28, 0xB5, 0x2F, 0xFD, 0x00], Compression::Zstd)]
    fn formats_by_signature(#[case] bytes: &[u8], #[case] expected: Compression) {
        assert_eq!(Compression::from_magic_bytes(bytes), expected);
    }
}
