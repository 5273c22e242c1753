use super::{Status, compress};
use crate::cli::SyncArgs;
use crate::error::{ErrorKind, Result};
use crate::format;
use exn::ResultExt;
use futures::StreamExt;
use rlogsync_config::Config;
use rlogsync_sync::{Context, SshConnector, SyncEvent, SyncSummary};
use std::pin::pin;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub async fn run(config: &Config, args: &SyncArgs, cancel: &CancellationToken) -> Result<Status> {
    let devices = config.select_devices(&args.devices).or_raise(|| ErrorKind::Config)?;
    let ctx = Context::new(config);
    let connector = SshConnector::from(&config.sync.ssh);
    tracing::info!(devices = devices.len(), strategy = ctx.strategy.name(), "starting sync");

    let started = Instant::now();
    let mut summary = SyncSummary::default();
    let mut events = pin!(rlogsync_sync::sync(&ctx, &connector, devices, cancel));
    while let Some(event) = events.next().await {
        print_event(&event);
        summary.record(&event);
    }
    print_summary(&summary, started);

    if !args.no_compress && !summary.cancelled {
        compress::run(config, None).await?;
    }
    Ok(match summary.unreachable.is_empty() {
        true => Status::Success,
        false => Status::DevicesUnreachable,
    })
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::DeviceSynced(report) => {
            println!(
                "{}: {} listed, {} needed, {} fetched, {} moved, {} duplicate ({} via {})",
                report.label,
                report.listed,
                report.needed,
                report.fetched,
                report.moved,
                report.duplicates,
                format::duration(report.elapsed),
                report.strategy,
            );
            for path in &report.missing {
                println!("  missing: {path}");
            }
            for name in &report.collisions {
                println!("  collision dropped: {name}");
            }
        },
        SyncEvent::DeviceSkipped { label, reason } => println!("{label}: skipped ({reason})"),
        SyncEvent::DeviceFailed { label, error } => println!("{label}: failed ({error})"),
        SyncEvent::Cancelled => println!("cancelled"),
        SyncEvent::Started { .. } | SyncEvent::DeviceStarted { .. } | SyncEvent::Complete => {},
    }
}

fn print_summary(summary: &SyncSummary, started: Instant) {
    println!(
        "synced {}/{} devices ({} skipped, {} failed): {} needed, {} fetched, {} missing, {} moved, {} duplicate, {} collisions in {}",
        summary.synced,
        summary.devices,
        summary.skipped,
        summary.failed.len(),
        summary.needed,
        summary.fetched,
        summary.missing,
        summary.moved,
        summary.duplicates,
        summary.collisions,
        format::duration(started.elapsed()),
    );
    if !summary.unreachable.is_empty() {
        println!("unreachable: {}", summary.unreachable.join(", "));
    }
}
