//! Pulling new log segments from devices into the local archive.
//!
//! A device run lists the device's logs, works out which ones the archive is
//! missing, transfers those into a staging area and moves them into the
//! archive under their canonical flat names. [`sync`] drives that run for
//! every configured device in turn.

mod canonicalize;
mod connect;
mod delta;
pub mod error;
#[cfg(test)]
mod fixtures;
mod inventory;
pub mod naming;
mod pipeline;
mod probe;
mod stream;
pub mod transfer;

pub use crate::canonicalize::{Canonicalizer, Finalized};
pub use crate::connect::{Connector, SshConnector};
pub use crate::delta::{DeltaComputer, TransferPlan};
pub use crate::inventory::{LocalInventory, RemoteInventory, RemotePathRecord};
pub use crate::naming::NamingScheme;
pub use crate::pipeline::{Context, DeviceOutcome, DeviceReport, STAGING_DIR, sync_device, sync_session};
pub use crate::probe::{Probe, probe};
pub use crate::stream::{SyncEvent, SyncSummary, sync};
pub use crate::transfer::{StageReport, TransferStrategy};
