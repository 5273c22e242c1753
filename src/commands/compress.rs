use crate::error::{ErrorKind, Result};
use crate::format;
use exn::ResultExt;
use rlogsync_archive::{CompressionReport, CompressionStage, Encoder};
use rlogsync_compress::cli::{Flag, Preference};
use rlogsync_config::{CompressionSettings, Config};

/// Compress the archive. `None` when compression is switched off.
pub async fn run(config: &Config, codec: Flag) -> Result<Option<CompressionReport>> {
    let preference = Preference::try_from(codec).or_raise(|| ErrorKind::Config)?;
    let Some(encoder) = Encoder::probe(&settings(&config.compression, preference)).or_raise(|| ErrorKind::Compress)? else {
        tracing::info!("compression disabled");
        return Ok(None);
    };
    tracing::debug!(?encoder, "selected encoder");
    let stage = CompressionStage::new(encoder, &config.sync.marker);
    let report = stage.compress_all(&config.sync.archive_dir).await.or_raise(|| ErrorKind::Compress)?;

    for (label, stats) in &report.devices {
        println!(
            "{label}: compressed {} files, {} -> {} ({} errors)",
            stats.files_compressed,
            format::bytes(stats.original_bytes),
            format::bytes(stats.compressed_bytes),
            stats.errors,
        );
    }
    let total = report.total();
    println!(
        "compressed {} files as {}, saved {} ({:.1}% of original), {} errors",
        total.files_compressed,
        stage.encoder().format(),
        format::bytes(total.saved_bytes()),
        total.ratio() * 100.0,
        total.errors,
    );
    Ok(Some(report))
}

/// Asking for a codec on the command line switches compression on even when
/// the configuration has it off.
fn settings(configured: &CompressionSettings, preference: Preference) -> CompressionSettings {
    CompressionSettings {
        enabled: configured.enabled || preference != Preference::NotSpecified,
        codec: preference.resolve(configured.codec),
        zstd_program: configured.zstd_program.clone(),
    }
}
