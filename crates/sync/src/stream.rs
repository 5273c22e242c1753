//! Syncing every selected device in turn, as a stream of events.

use crate::connect::Connector;
use crate::error::{Error, ErrorKind};
use crate::pipeline::{Context, DeviceOutcome, DeviceReport, sync_device};
use async_stream::stream;
use futures::Stream;
use rlogsync_config::Device;
use tokio_util::sync::CancellationToken;

/// Progress events emitted by [`sync`] as it works through the devices.
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. Per device, [`DeviceStarted`](Self::DeviceStarted) followed by one of
///    [`DeviceSynced`](Self::DeviceSynced), [`DeviceSkipped`](Self::DeviceSkipped)
///    or [`DeviceFailed`](Self::DeviceFailed).
/// 3. [`Complete`](Self::Complete), or [`Cancelled`](Self::Cancelled) if the
///    user aborted. Either one ends the stream.
#[derive(Debug)]
pub enum SyncEvent {
    Started { devices: usize },
    DeviceStarted { label: String },
    DeviceSynced(Box<DeviceReport>),
    DeviceSkipped { label: String, reason: String },
    /// The device's run failed as a whole. Later devices still run.
    DeviceFailed { label: String, error: Error },
    Cancelled,
    Complete,
}

/// Streams [`SyncEvent`]s while syncing `devices` strictly one after the
/// other, pausing for the configured cooldown between two devices.
///
/// A failing device never ends the stream. Cancellation is honoured between
/// devices and, through the transfer strategy, during one.
pub fn sync<'a>(
    ctx: &'a Context<'a>,
    connector: &'a dyn Connector,
    devices: Vec<&'a Device>,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = SyncEvent> + 'a {
    stream!({
        yield SyncEvent::Started { devices: devices.len() };
        let cooldown = ctx.config.sync.cooldown();
        for (index, device) in devices.into_iter().enumerate() {
            if index > 0 && !cooldown.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(cooldown) => {},
                    () = cancel.cancelled() => {},
                }
            }
            if cancel.is_cancelled() {
                yield SyncEvent::Cancelled;
                return;
            }
            yield SyncEvent::DeviceStarted { label: device.label.clone() };
            match sync_device(ctx, connector, device, cancel).await {
                Ok(DeviceOutcome::Synced(report)) => yield SyncEvent::DeviceSynced(Box::new(report)),
                Ok(DeviceOutcome::Skipped { label, reason }) => yield SyncEvent::DeviceSkipped { label, reason },
                Err(error) if matches!(&*error, ErrorKind::Cancelled) => {
                    yield SyncEvent::Cancelled;
                    return;
                },
                Err(error) => {
                    tracing::error!(device = %device.label, error = %error, "device sync failed");
                    yield SyncEvent::DeviceFailed { label: device.label.clone(), error };
                },
            }
        }
        yield SyncEvent::Complete;
    })
}

/// Run-level totals, aggregated from [`SyncEvent`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub devices: usize,
    pub synced: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
    /// Devices that could not be reached or refused our credentials.
    pub unreachable: Vec<String>,
    pub needed: usize,
    pub fetched: usize,
    pub missing: usize,
    pub moved: usize,
    pub duplicates: usize,
    pub collisions: usize,
    pub cancelled: bool,
}

impl SyncSummary {
    pub fn record(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::Started { devices } => self.devices = *devices,
            SyncEvent::DeviceSynced(report) => {
                self.synced += 1;
                self.needed += report.needed;
                self.fetched += report.fetched;
                self.missing += report.missing.len();
                self.moved += report.moved;
                self.duplicates += report.duplicates;
                self.collisions += report.collisions.len();
            },
            SyncEvent::DeviceSkipped { .. } => self.skipped += 1,
            SyncEvent::DeviceFailed { label, error } => {
                self.failed.push(label.clone());
                if error.is_connection() {
                    self.unreachable.push(label.clone());
                }
            },
            SyncEvent::Cancelled => self.cancelled = true,
            SyncEvent::DeviceStarted { .. } | SyncEvent::Complete => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FailingConnector, MockConnector, config, device};
    use crate::transfer::{PerFileFetch, TransferStrategy};
    use futures::StreamExt;

    fn label(event: &SyncEvent) -> String {
        match event {
            SyncEvent::Started { devices } => format!("started:{devices}"),
            SyncEvent::DeviceStarted { label } => format!("start:{label}"),
            SyncEvent::DeviceSynced(report) => format!("synced:{}", report.label),
            SyncEvent::DeviceSkipped { label, .. } => format!("skipped:{label}"),
            SyncEvent::DeviceFailed { label, .. } => format!("failed:{label}"),
            SyncEvent::Cancelled => "cancelled".to_string(),
            SyncEvent::Complete => "complete".to_string(),
        }
    }

    #[tokio::test]
    async fn devices_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let ctx = Context::new(&config).with_strategy(TransferStrategy::PerFileFetch(PerFileFetch::default()));
        let (tici, mici) = (device("tici"), device("mici"));
        let cancel = CancellationToken::new();
        let events: Vec<SyncEvent> = sync(&ctx, &MockConnector("D1"), vec![&tici, &mici], &cancel).collect().await;
        assert_eq!(
            events.iter().map(label).collect::<Vec<_>>(),
            vec!["started:2", "start:tici", "synced:tici", "start:mici", "synced:mici", "complete"]
        );
        let mut summary = SyncSummary::default();
        events.iter().for_each(|e| summary.record(e));
        assert_eq!((summary.devices, summary.synced, summary.moved, summary.fetched), (2, 2, 6, 6));
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn failed_device_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let ctx = Context::new(&config).with_strategy(TransferStrategy::PerFileFetch(PerFileFetch::default()));
        let (tici, mici) = (device("tici"), device("mici"));
        let cancel = CancellationToken::new();
        let events: Vec<SyncEvent> = sync(&ctx, &FailingConnector, vec![&tici, &mici], &cancel).collect().await;
        assert_eq!(
            events.iter().map(label).collect::<Vec<_>>(),
            vec!["started:2", "start:tici", "failed:tici", "start:mici", "failed:mici", "complete"]
        );
        let mut summary = SyncSummary::default();
        events.iter().for_each(|e| summary.record(e));
        assert_eq!(summary.unreachable, vec!["tici", "mici"]);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_device() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let ctx = Context::new(&config).with_strategy(TransferStrategy::PerFileFetch(PerFileFetch::default()));
        let tici = device("tici");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events: Vec<SyncEvent> = sync(&ctx, &MockConnector("D1"), vec![&tici], &cancel).collect().await;
        assert_eq!(events.iter().map(label).collect::<Vec<_>>(), vec!["started:1", "cancelled"]);
    }
}
