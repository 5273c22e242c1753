//! One fetch per needed file through the device session.

use crate::delta::TransferPlan;
use crate::error::{ErrorKind, Result};
use crate::transfer::staged_path;
use futures::StreamExt;
use rlogsync_remote::RemoteAccess;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Fetches needed files individually, at most `max_in_flight` at a time.
///
/// A failed fetch is logged and skipped; it shows up as missing in the
/// stage report. Files already in staging (left over from an interrupted
/// run) are not fetched again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerFileFetch {
    max_in_flight: usize,
}

impl Default for PerFileFetch {
    fn default() -> Self {
        Self::new(1)
    }
}

impl PerFileFetch {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub(crate) async fn run(
        &self,
        remote: &dyn RemoteAccess,
        root: &str,
        plan: &TransferPlan,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let fetches = futures::stream::iter(plan.needed.iter())
            .map(|record| async move {
                let Some(local) = staged_path(staging, &record.relative_path) else {
                    tracing::warn!(path = %record.relative_path, "refusing to stage path outside the staging area");
                    return;
                };
                if tokio::fs::try_exists(&local).await.unwrap_or(false) {
                    tracing::debug!(path = %record.relative_path, "already staged");
                    return;
                }
                let source = format!("{root}/{}", record.relative_path.trim_start_matches('/'));
                match remote.fetch(&source, &local).await {
                    Ok(bytes) => tracing::debug!(path = %record.relative_path, bytes, "fetched"),
                    Err(err) => tracing::warn!(path = %record.relative_path, error = %err, "fetch failed; skipping"),
                }
            })
            .buffer_unordered(self.max_in_flight)
            .take_until(cancel.cancelled());
        let mut fetches = std::pin::pin!(fetches);
        while fetches.next().await.is_some() {}
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(())
    }
}
