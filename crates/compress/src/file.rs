//! In-place file compression.
//!
//! An original is only ever removed once a compressed sibling exists on disk
//! and carries the expected magic bytes. A failed encode removes whatever
//! partial output it left behind and keeps the original.

use crate::Compression;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::instrument;

const MAGIC_PROBE_LEN: usize = 8;

/// Outcome of compressing a single file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedFile {
    pub source: PathBuf,
    pub target: PathBuf,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl CompressedFile {
    /// Compressed size as a fraction of the original (0.0 for empty input).
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.compressed_size as f64 / self.original_size as f64
    }
}

impl Compression {
    /// Path of the compressed sibling for `source`.
    #[must_use]
    pub fn target_path(&self, source: impl AsRef<Path>) -> PathBuf {
        self.append_extension(source)
    }

    /// Compress `source` to `source + extension`, verify the result and
    /// remove the original.
    ///
    /// An existing target is never overwritten.
    #[instrument(skip_all, fields(format = %self, source = %source.as_ref().display()))]
    pub fn compress_file(&self, source: impl AsRef<Path>) -> Result<CompressedFile> {
        let source = source.as_ref();
        if matches!(self, Compression::None) {
            exn::bail!(ErrorKind::UnsupportedFormat(self.to_string()));
        }
        if !self.is_builtin() {
            exn::bail!(ErrorKind::DisabledFormat(self.to_string()));
        }
        let target = self.target_path(source);
        let original_size = fs::metadata(source).or_raise(|| ErrorKind::Io)?.len();

        let output = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(err) if err.kind() == IoErrorKind::AlreadyExists => {
                exn::bail!(ErrorKind::TargetExists(target));
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        };

        if let Err(err) = self.encode_file(source, output) {
            discard_partial(&target);
            return Err(err);
        }
        if let Err(err) = verify_replacement(source, &target, *self) {
            discard_partial(&target);
            return Err(err);
        }

        let compressed_size = fs::metadata(&target).or_raise(|| ErrorKind::Io)?.len();
        tracing::debug!(target_path = %target.display(), original_size, compressed_size, "compressed file");
        Ok(CompressedFile {
            source: source.to_path_buf(),
            target,
            original_size,
            compressed_size,
        })
    }

    fn encode_file(&self, source: &Path, output: File) -> Result<()> {
        let input = File::open(source).or_raise(|| ErrorKind::Io)?;
        let (writer, _) = self.encode_to(BufReader::new(input), BufWriter::new(output))?;
        let file = writer.into_inner().map_err(|err| err.into_error()).or_raise(|| ErrorKind::Io)?;
        file.sync_all().or_raise(|| ErrorKind::Io)
    }
}

/// Confirm `target` is a non-empty `format` artifact, then remove `source`.
///
/// Also used for artifacts produced outside this crate (an external encoder
/// binary), which is why it takes the format explicitly.
pub fn verify_replacement(source: &Path, target: &Path, format: Compression) -> Result<()> {
    let mut head = Vec::with_capacity(MAGIC_PROBE_LEN);
    File::open(target)
        .or_raise(|| ErrorKind::Verification(target.to_path_buf()))?
        .take(MAGIC_PROBE_LEN as u64)
        .read_to_end(&mut head)
        .or_raise(|| ErrorKind::Verification(target.to_path_buf()))?;
    if head.is_empty() || !format.check_magic_bytes(&head) {
        exn::bail!(ErrorKind::Verification(target.to_path_buf()));
    }
    fs::remove_file(source).or_raise(|| ErrorKind::Io)
}

/// Best-effort removal of a partially written artifact.
pub fn discard_partial(target: &Path) {
    match fs::remove_file(target) {
        Ok(()) => tracing::debug!(path = %target.display(), "removed partial output"),
        Err(err) if err.kind() == IoErrorKind::NotFound => {},
        Err(err) => tracing::warn!(path = %target.display(), error = %err, "could not remove partial output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[rstest]
    #[case(Compression::Gzip)]
    #[case(Compression::Bzip2)]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn compresses_and_removes_original(#[case] format: Compression) {
        let dir = TempDir::new().unwrap();
        let payload = b"rlog line\n".repeat(10_000);
        let source = write(&dir, "D1|a|b--rlog", &payload);

        let result = format.compress_file(&source).unwrap();

        assert!(!source.exists());
        assert_eq!(result.target, dir.path().join(format!("D1|a|b--rlog{}", format.extension())));
        assert_eq!(result.original_size, payload.len() as u64);
        assert!(result.compressed_size < result.original_size);
        assert!(result.ratio() < 1.0);
        let mut decoded = Vec::new();
        format.decode_to(File::open(&result.target).unwrap(), &mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn refuses_to_overwrite_existing_target() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "rlog", b"fresh");
        let existing = write(&dir, "rlog.gz", b"already here");

        let err = Compression::Gzip.compress_file(&source).unwrap_err();

        assert!(matches!(&*err, ErrorKind::TargetExists(p) if p == &existing));
        assert!(source.exists());
        assert_eq!(fs::read(&existing).unwrap(), b"already here");
    }

    #[test]
    fn missing_source_leaves_no_partial() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("rlog");

        assert!(Compression::Gzip.compress_file(&source).is_err());
        assert!(!dir.path().join("rlog.gz").exists());
    }

    #[test]
    fn none_is_not_a_target_format() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "rlog", b"data");
        let err = Compression::None.compress_file(&source).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
        assert!(source.exists());
    }

    #[test]
    fn verification_rejects_wrong_format_and_keeps_source() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "rlog", b"data");
        let target = write(&dir, "rlog.zst", b"not zstd at all");

        let err = verify_replacement(&source, &target, Compression::Zstd).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Verification(_)));
        assert!(source.exists());
    }

    #[test]
    fn verification_rejects_empty_target() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "rlog", b"data");
        let target = write(&dir, "rlog.gz", b"");
        assert!(verify_replacement(&source, &target, Compression::Gzip).is_err());
        assert!(source.exists());
    }

    #[test]
    fn discard_partial_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let partial = write(&dir, "rlog.gz", b"half");
        discard_partial(&partial);
        assert!(!partial.exists());
        discard_partial(&partial);
    }

    #[test]
    fn ratio_of_empty_file() {
        let file = CompressedFile {
            source: PathBuf::from("a"),
            target: PathBuf::from("a.gz"),
            original_size: 0,
            compressed_size: 20,
        };
        assert_eq!(file.ratio(), 0.0);
    }
}
