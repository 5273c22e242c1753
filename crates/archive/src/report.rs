//! How much is in the archive, per device.

use crate::error::Result;
use crate::walk;
use rlogsync_compress::Compression;
use std::path::Path;

/// Counts of archived files by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub uncompressed: usize,
    pub gzip: usize,
    pub zstd: usize,
    pub bzip2: usize,
    pub other: usize,
}

impl FileCounts {
    fn count(&mut self, name: &str, marker: &str) {
        if !name.contains(marker) {
            self.other += 1;
            return;
        }
        match Compression::from_path(name) {
            Compression::None if name.ends_with(".part") => self.other += 1,
            Compression::None => self.uncompressed += 1,
            Compression::Gzip => self.gzip += 1,
            Compression::Zstd => self.zstd += 1,
            Compression::Bzip2 => self.bzip2 += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.uncompressed + self.gzip + self.zstd + self.bzip2 + self.other
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DongleUsage {
    pub dongle_id: String,
    pub bytes: u64,
    pub files: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceUsage {
    pub label: String,
    pub bytes: u64,
    pub counts: FileCounts,
    /// Sorted by dongle id.
    pub dongles: Vec<DongleUsage>,
}

/// Per-device usage of the archive, sorted by label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub devices: Vec<DeviceUsage>,
}

impl ArchiveReport {
    /// Walk `archive_dir/<label>/<dongle>/`. Hidden directories (staging)
    /// are not counted.
    pub async fn scan(archive_dir: &Path, marker: &str) -> Result<Self> {
        let mut report = Self::default();
        for (label, label_dir) in walk::subdirs(archive_dir).await? {
            let mut device = DeviceUsage {
                label,
                ..DeviceUsage::default()
            };
            for (dongle_id, dongle_dir) in walk::subdirs(&label_dir).await? {
                let mut dongle = DongleUsage {
                    dongle_id,
                    ..DongleUsage::default()
                };
                for found in walk::files(&dongle_dir).await? {
                    let name = found.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                    device.counts.count(&name, marker);
                    dongle.bytes += found.size;
                    dongle.files += 1;
                }
                device.bytes += dongle.bytes;
                device.dongles.push(dongle);
            }
            report.devices.push(device);
        }
        Ok(report)
    }

    pub fn total_bytes(&self) -> u64 {
        self.devices.iter().map(|d| d.bytes).sum()
    }
}
