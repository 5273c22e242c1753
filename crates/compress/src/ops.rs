//! Compression Operations

use crate::Compression;
use crate::error::{ErrorKind, Result};
use bzip2::{Compression as BzCompression, write::BzEncoder};
use exn::ResultExt;
use flate2::{Compression as GzCompression, write::GzEncoder};
use std::io::{self, Read, Write};
use tracing::instrument;
#[cfg(feature = "zstd")]
use zstd::stream::write::Encoder as ZstdEncoder;

// Segments are archived once and kept for a long time: favour ratio.
// Zstd stops short of the `--ultra` levels.
const BZIP2_LEVEL: BzCompression = BzCompression::best();
const GZIP_LEVEL: GzCompression = GzCompression::best();
#[cfg(feature = "zstd")]
const ZSTD_LEVEL: i32 = 19;

/// Drain `reader` into an encoder, then finish it so trailer write failures
/// are reported instead of being lost on drop.
macro_rules! pump {
    ($encoder:expr, $reader:expr) => {{
        let mut encoder = $encoder;
        let consumed = io::copy($reader, &mut encoder).or_raise(|| ErrorKind::Io)?;
        (encoder.finish().or_raise(|| ErrorKind::Io)?, consumed)
    }};
}

impl Compression {
    /// Encode everything `reader` yields into `writer`. Returns the writer
    /// and the number of uncompressed bytes read.
    #[instrument(skip(reader, writer), fields(format = %self, input_size))]
    pub fn encode_to<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<(W, u64)> {
        let (writer, consumed) = match self {
            Compression::None => {
                let consumed = io::copy(&mut reader, &mut writer).or_raise(|| ErrorKind::Io)?;
                (writer, consumed)
            },
            Compression::Bzip2 => pump!(BzEncoder::new(writer, BZIP2_LEVEL), &mut reader),
            Compression::Gzip => pump!(GzEncoder::new(writer, GZIP_LEVEL), &mut reader),
            #[cfg(feature = "zstd")]
            Compression::Zstd => pump!(ZstdEncoder::new(writer, ZSTD_LEVEL).or_raise(|| ErrorKind::Encoder)?, &mut reader),
            #[cfg(not(feature = "zstd"))]
            Compression::Zstd => exn::bail!(ErrorKind::DisabledFormat(self.to_string())),
        };
        tracing::Span::current().record("input_size", consumed);
        Ok((writer, consumed))
    }

    /// Decode a stream in this format into `writer`, returning the number of
    /// uncompressed bytes written.
    #[cfg(test)]
    pub(crate) fn decode_to<'a, R: Read + 'a, W: Write>(&self, reader: R, mut writer: W) -> Result<u64> {
        let mut decoder: Box<dyn Read + 'a> = match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader).or_raise(|| ErrorKind::Encoder)?),
            #[cfg(not(feature = "zstd"))]
            Compression::Zstd => exn::bail!(ErrorKind::DisabledFormat(self.to_string())),
        };
        io::copy(&mut decoder, &mut writer).or_raise(|| ErrorKind::InvalidData)
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use crate::error::ErrorKind;
    use rstest::rstest;

    fn segment() -> Vec<u8> {
        (0..4096u32).flat_map(|i| (i % 251).to_le_bytes()).collect()
    }

    #[rstest]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn encoded_output_is_smaller_and_recognisable(#[case] format: Compression) {
        let original = segment();
        let (encoded, consumed) = format.encode_to(original.as_slice(), Vec::new()).unwrap();
        assert_eq!(consumed, original.len() as u64);
        assert!(encoded.len() < original.len());
        assert_eq!(Compression::from_magic_bytes(&encoded), format);

        let mut decoded = Vec::new();
        let written = format.decode_to(encoded.as_slice(), &mut decoded).unwrap();
        assert_eq!(written, original.len() as u64);
        assert_eq!(decoded, original);
    }

    #[test]
    fn none_copies_bytes_through() {
        let (out, consumed) = Compression::None.encode_to(&b"rlog"[..], Vec::new()).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(out, b"rlog");
    }

    #[rstest]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn garbage_does_not_decode(#[case] format: Compression) {
        let err = format.decode_to(&b"plain text, not an archive"[..], Vec::new()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData | ErrorKind::Encoder));
    }

    #[test]
    fn empty_input_still_produces_a_valid_stream() {
        let (encoded, consumed) = Compression::Gzip.encode_to(&b""[..], Vec::new()).unwrap();
        assert_eq!(consumed, 0);
        assert!(Compression::Gzip.check_magic_bytes(&encoded));
        assert_eq!(Compression::Gzip.decode_to(encoded.as_slice(), Vec::new()).unwrap(), 0);
    }

    #[cfg(not(feature = "zstd"))]
    #[test]
    fn zstd_needs_the_feature() {
        let err = Compression::Zstd.encode_to(&b"data"[..], Vec::new()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::DisabledFormat(_)));
    }
}
