use crate::error::{ErrorKind, Result};
use crate::format;
use exn::ResultExt;
use rlogsync_archive::{ArchiveReport, DeviceUsage};
use rlogsync_config::Config;

pub async fn run(config: &Config) -> Result<ArchiveReport> {
    let report = ArchiveReport::scan(&config.sync.archive_dir, &config.sync.marker)
        .await
        .or_raise(|| ErrorKind::Archive)?;
    if report.devices.is_empty() {
        println!("archive {} is empty", config.sync.archive_dir.display());
        return Ok(report);
    }
    for device in &report.devices {
        print!("{}", render(device));
    }
    println!("total: {}", format::bytes(report.total_bytes()));
    Ok(report)
}

fn render(device: &DeviceUsage) -> String {
    let counts = &device.counts;
    let mut out = format!(
        "{}: {} ({} rlog, {} .gz, {} .zst, {} .bz2, {} other)\n",
        device.label,
        format::bytes(device.bytes),
        counts.uncompressed,
        counts.gzip,
        counts.zstd,
        counts.bzip2,
        counts.other,
    );
    if device.dongles.len() > 1 {
        for dongle in &device.dongles {
            out.push_str(&format!("  {}: {} in {} files\n", dongle.dongle_id, format::bytes(dongle.bytes), dongle.files));
        }
    }
    out
}
