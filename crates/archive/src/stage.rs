//! Compressing every uncompressed log in the archive.

use crate::codec::Encoder;
use crate::error::{ErrorKind, Result};
use crate::walk;
use exn::ResultExt;
use futures::StreamExt;
use rlogsync_compress::{CompressedFile, Compression};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::thread::available_parallelism;

/// Compression totals for one device (or a whole run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionStats {
    pub files_compressed: usize,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub errors: usize,
}
impl CompressionStats {
    fn record(&mut self, file: &CompressedFile) {
        self.files_compressed += 1;
        self.original_bytes += file.original_size;
        self.compressed_bytes += file.compressed_size;
    }

    pub fn merge(&mut self, other: &Self) {
        self.files_compressed += other.files_compressed;
        self.original_bytes += other.original_bytes;
        self.compressed_bytes += other.compressed_bytes;
        self.errors += other.errors;
    }

    /// Compressed size as a fraction of the original (0.0 when nothing was
    /// compressed).
    pub fn ratio(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        self.compressed_bytes as f64 / self.original_bytes as f64
    }

    pub fn saved_bytes(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compressed_bytes)
    }
}

/// Per-device statistics, keyed by the first path component under the
/// archive directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionReport {
    pub devices: BTreeMap<String, CompressionStats>,
}
impl CompressionReport {
    pub fn total(&self) -> CompressionStats {
        self.devices.values().fold(CompressionStats::default(), |mut total, stats| {
            total.merge(stats);
            total
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompressionStage {
    encoder: Encoder,
    marker: String,
    max_in_flight: usize,
}

impl CompressionStage {
    pub fn new(encoder: Encoder, marker: impl Into<String>) -> Self {
        Self {
            encoder,
            marker: marker.into(),
            max_in_flight: available_parallelism().map_or(1, |n| n.get()),
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Uncompressed log files below `archive_dir`, sorted.
    pub async fn candidates(&self, archive_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(walk::files(archive_dir)
            .await?
            .into_iter()
            .map(|found| found.path)
            .filter(|path| self.is_candidate(path))
            .collect())
    }

    fn is_candidate(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.contains(&self.marker) && !name.ends_with(".part") && Compression::from_path(path) == Compression::None
    }

    /// Compress every candidate below `archive_dir`.
    ///
    /// A file that fails is counted in its device's `errors` and left as it
    /// was; it never stops the other files.
    #[tracing::instrument(skip_all, fields(archive = %archive_dir.display(), format = %self.encoder.format()))]
    pub async fn compress_all(&self, archive_dir: &Path) -> Result<CompressionReport> {
        let candidates = self.candidates(archive_dir).await?;
        tracing::info!(files = candidates.len(), "compressing archive");

        let results: Vec<(PathBuf, Result<CompressedFile>)> = futures::stream::iter(candidates)
            .map(|path| {
                let encoder = self.encoder.clone();
                async move {
                    let source = path.clone();
                    let result = tokio::task::spawn_blocking(move || encoder.compress_file(&source))
                        .await
                        .or_raise(|| ErrorKind::Compress(path.clone()))
                        .and_then(|inner| inner);
                    (path, result)
                }
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let mut report = CompressionReport::default();
        for (path, result) in results {
            let stats = report.devices.entry(device_label(archive_dir, &path)).or_default();
            match result {
                Ok(file) => stats.record(&file),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "compression failed; original kept");
                    stats.errors += 1;
                },
            }
        }
        let total = report.total();
        tracing::info!(
            compressed = total.files_compressed,
            errors = total.errors,
            original_bytes = total.original_bytes,
            compressed_bytes = total.compressed_bytes,
            "archive compressed"
        );
        Ok(report)
    }
}

fn device_label(archive_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(archive_dir).unwrap_or(path);
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(first)), Some(_)) => first.to_string_lossy().into_owned(),
        _ => String::new(),
    }
}
