//! One device, start to finish: probe, list, delta, transfer, canonicalize.

use crate::canonicalize::Canonicalizer;
use crate::connect::Connector;
use crate::delta::DeltaComputer;
use crate::error::{ErrorKind, Result};
use crate::inventory::{LocalInventory, RemoteInventory};
use crate::naming::{NamingScheme, sanitize};
use crate::probe::{Probe, probe};
use crate::transfer::TransferStrategy;
use exn::ResultExt;
use futures::TryStreamExt;
use rlogsync_config::{Config, Device};
use rlogsync_remote::RemoteAccess;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Name of the per-dongle staging directory.
pub const STAGING_DIR: &str = ".staging";

/// Everything a device run needs, built once per process.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    pub config: &'a Config,
    pub naming: NamingScheme,
    pub strategy: TransferStrategy,
}

impl<'a> Context<'a> {
    /// Derive the naming scheme and probe for the transfer strategy.
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            naming: NamingScheme::from(&config.sync.naming),
            strategy: TransferStrategy::select(&config.sync),
        }
    }

    pub fn with_strategy(mut self, strategy: TransferStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// `<archive>/<label>/<dongle id>`
    pub fn dongle_dir(&self, label: &str, dongle_id: &str) -> PathBuf {
        self.config.sync.archive_dir.join(label).join(sanitize(dongle_id))
    }
}

/// What one device run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceReport {
    pub label: String,
    pub dongle_id: String,
    pub strategy: &'static str,
    /// Matching files on the device.
    pub listed: usize,
    /// Files the archive did not have yet.
    pub needed: usize,
    /// Needed files that arrived in staging.
    pub fetched: usize,
    /// Needed files that did not arrive.
    pub missing: Vec<String>,
    pub moved: usize,
    pub duplicates: usize,
    pub collisions: Vec<String>,
    pub failed_moves: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutcome {
    Synced(DeviceReport),
    Skipped { label: String, reason: String },
}

/// Connect to `device`, sync it, and always tear the session down.
pub async fn sync_device(
    ctx: &Context<'_>,
    connector: &dyn Connector,
    device: &Device,
    cancel: &CancellationToken,
) -> Result<DeviceOutcome> {
    let remote = connector.connect(device).await.or_raise(|| ErrorKind::Connection(device.label.clone()))?;
    let outcome = sync_session(ctx, remote.as_ref(), device, cancel).await;
    if let Err(err) = remote.close().await {
        tracing::warn!(device = %device.label, error = %err, "could not close session");
    }
    outcome
}

/// Sync `device` over an already open session.
#[tracing::instrument(skip_all, fields(device = %device.label))]
pub async fn sync_session(
    ctx: &Context<'_>,
    remote: &dyn RemoteAccess,
    device: &Device,
    cancel: &CancellationToken,
) -> Result<DeviceOutcome> {
    let started = Instant::now();
    let settings = &ctx.config.sync;
    let dongle_id = match probe(remote, &device.label, settings).await? {
        Probe::Ready { dongle_id } => dongle_id,
        Probe::Skip { reason } => {
            tracing::info!(reason, "skipping device");
            return Ok(DeviceOutcome::Skipped {
                label: device.label.clone(),
                reason,
            });
        },
    };

    let records: Vec<_> = RemoteInventory::new(remote, &settings.remote_root, &settings.marker)
        .list()
        .try_collect()
        .await?;
    let archive = ctx.dongle_dir(&device.label, &dongle_id);
    let staging = archive.join(STAGING_DIR);
    let local = LocalInventory::scan(&archive).await?;
    let listed = records.len();
    let plan = DeltaComputer::new(&ctx.naming, &dongle_id).compute_needed(records, &local);
    tracing::info!(dongle_id, listed, archived = local.len(), needed = plan.len(), "computed delta");

    let stage = ctx.strategy.stage(remote, &settings.remote_root, &plan, &staging, cancel).await?;
    for path in &stage.missing {
        tracing::warn!(path, "needed file did not arrive");
    }
    // Leftovers from an interrupted run are finalized too, so this runs even
    // when nothing was needed.
    let finalized = Canonicalizer::new(&ctx.naming, &dongle_id).finalize(&staging, &archive).await?;
    let report = DeviceReport {
        label: device.label.clone(),
        dongle_id,
        strategy: ctx.strategy.name(),
        listed,
        needed: plan.len(),
        fetched: stage.landed.len(),
        missing: stage.missing,
        moved: finalized.moved,
        duplicates: finalized.duplicates,
        collisions: finalized.collisions,
        failed_moves: finalized.failed,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        fetched = report.fetched,
        missing = report.missing.len(),
        moved = report.moved,
        duplicates = report.duplicates,
        "device synced"
    );
    Ok(DeviceOutcome::Synced(report))
}
