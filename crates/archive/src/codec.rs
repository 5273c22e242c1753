//! Choosing how archived logs get compressed.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use rlogsync_compress::error::{ErrorKind as CompressErrorKind, Result as CompressResult};
use rlogsync_compress::{CompressedFile, Compression, discard_partial, verify_replacement};
use rlogsync_config::CompressionSettings;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Matches the level of the in-process zstd encoder.
const EXTERNAL_ZSTD_LEVEL: &str = "-19";

/// Something that can compress a file in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoder {
    /// Encoded in-process.
    Builtin(Compression),
    /// Encoded by an external `zstd` executable.
    ExternalZstd { program: PathBuf },
}

impl Encoder {
    /// Resolve the configured codec into an encoder, probing the host once.
    /// `None` means compression is switched off.
    pub fn probe(settings: &CompressionSettings) -> Result<Option<Self>> {
        if !settings.enabled {
            return Ok(None);
        }
        match settings.codec {
            Some(Compression::None) => Ok(None),
            Some(codec) => Self::for_codec(codec, &settings.zstd_program).map(Some),
            None => Ok(Some(Self::best_available(&settings.zstd_program))),
        }
    }

    /// Only gzip and zstd are accepted. Anything else would produce names the
    /// archive treats as separate device logs.
    pub fn for_codec(codec: Compression, zstd_program: &Path) -> Result<Self> {
        if !codec.is_archival() {
            exn::bail!(ErrorKind::UnsupportedCodec(codec.to_string()));
        }
        if codec.is_builtin() {
            return Ok(Self::Builtin(codec));
        }
        if codec == Compression::Zstd
            && let Ok(program) = which::which(zstd_program)
        {
            return Ok(Self::ExternalZstd { program });
        }
        exn::bail!(ErrorKind::NoEncoder(codec.to_string()))
    }

    /// Zstd when it can be had, in-process or not, otherwise gzip.
    pub fn best_available(zstd_program: &Path) -> Self {
        if Compression::Zstd.is_builtin() {
            return Self::Builtin(Compression::Zstd);
        }
        match which::which(zstd_program) {
            Ok(program) => Self::ExternalZstd { program },
            Err(err) => {
                tracing::debug!(program = %zstd_program.display(), error = %err, "zstd not available, using gzip");
                Self::Builtin(Compression::Gzip)
            },
        }
    }

    /// The format of the files this encoder produces.
    pub fn format(&self) -> Compression {
        match self {
            Self::Builtin(codec) => *codec,
            Self::ExternalZstd { .. } => Compression::Zstd,
        }
    }

    /// Compress `source` next to itself and remove it once the result is
    /// verified. Blocking.
    pub fn compress_file(&self, source: &Path) -> Result<CompressedFile> {
        let compressed = match self {
            Self::Builtin(codec) => codec.compress_file(source),
            Self::ExternalZstd { program } => external_zstd(program, source),
        };
        compressed.or_raise(|| ErrorKind::Compress(source.to_path_buf()))
    }
}

fn external_zstd(program: &Path, source: &Path) -> CompressResult<CompressedFile> {
    let target = Compression::Zstd.target_path(source);
    if target.exists() {
        exn::bail!(CompressErrorKind::TargetExists(target));
    }
    let original_size = fs::metadata(source).or_raise(|| CompressErrorKind::Io)?.len();
    let output = Command::new(program)
        .args(["-q", "--no-progress", EXTERNAL_ZSTD_LEVEL])
        .arg(source)
        .arg("-o")
        .arg(&target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .or_raise(|| CompressErrorKind::Encoder)?;
    if !output.status.success() {
        tracing::warn!(
            path = %source.display(),
            status = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "zstd failed"
        );
        discard_partial(&target);
        exn::bail!(CompressErrorKind::Encoder);
    }
    if let Err(err) = verify_replacement(source, &target, Compression::Zstd) {
        discard_partial(&target);
        return Err(err);
    }
    let compressed_size = fs::metadata(&target).or_raise(|| CompressErrorKind::Io)?.len();
    Ok(CompressedFile {
        source: source.to_path_buf(),
        target,
        original_size,
        compressed_size,
    })
}
