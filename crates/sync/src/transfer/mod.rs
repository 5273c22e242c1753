//! Moving bytes from a device into the staging area.
//!
//! Two strategies share one contract: given the remote root, a
//! [`TransferPlan`] and a staging directory, leave every needed file at
//! `staging/<relative path>`. Neither strategy's own exit status is trusted;
//! what actually landed is checked on disk afterwards and reported in a
//! [`StageReport`].

mod bulk;
mod fetch;

pub use self::bulk::{BulkMirror, PARTIAL_DIR};
pub use self::fetch::PerFileFetch;
use crate::delta::TransferPlan;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use rlogsync_config::{SyncSettings, TransferMethod};
use rlogsync_remote::RemoteAccess;
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Which needed files are in the staging area after a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub requested: usize,
    /// Relative paths found in staging.
    pub landed: Vec<String>,
    /// Relative paths that did not arrive.
    pub missing: Vec<String>,
}
impl StageReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Check the staging directory for every file of `plan`.
    pub async fn collect(plan: &TransferPlan, staging: &Path) -> Self {
        let mut report = StageReport {
            requested: plan.len(),
            ..StageReport::default()
        };
        for path in plan.paths() {
            let landed = match staged_path(staging, path) {
                Some(local) => tokio::fs::metadata(&local).await.is_ok_and(|m| m.is_file()),
                None => false,
            };
            match landed {
                true => report.landed.push(path.to_string()),
                false => report.missing.push(path.to_string()),
            }
        }
        report
    }
}

/// The transfer strategy for a run, chosen once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStrategy {
    BulkMirror(BulkMirror),
    PerFileFetch(PerFileFetch),
}

impl TransferStrategy {
    /// Pick the configured strategy. Bulk mirroring falls back to per-file
    /// fetching when the bulk tool is not installed.
    pub fn select(settings: &SyncSettings) -> Self {
        let per_file = PerFileFetch::new(settings.max_in_flight);
        match settings.transfer {
            TransferMethod::PerFile => Self::PerFileFetch(per_file),
            TransferMethod::Bulk => match which::which(&settings.rsync.program) {
                Ok(program) => Self::BulkMirror(BulkMirror::new(program, &settings.rsync, per_file)),
                Err(err) => {
                    tracing::warn!(
                        program = %settings.rsync.program.display(),
                        error = %err,
                        "bulk transfer tool not found; falling back to per-file fetch"
                    );
                    Self::PerFileFetch(per_file)
                },
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BulkMirror(_) => "bulk",
            Self::PerFileFetch(_) => "per-file",
        }
    }

    /// Transfer `plan` from `root` on the device into `staging`.
    ///
    /// Files that fail to arrive are reported, not raised. Errors are
    /// reserved for a transfer that could not run at all, and for
    /// cancellation.
    pub async fn stage(
        &self,
        remote: &dyn RemoteAccess,
        root: &str,
        plan: &TransferPlan,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<StageReport> {
        if plan.is_empty() {
            return Ok(StageReport::default());
        }
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        tokio::fs::create_dir_all(staging).await.or_raise(|| ErrorKind::Io)?;
        let root = root.trim_end_matches('/');
        match self {
            Self::BulkMirror(bulk) => match remote.transport() {
                Some(transport) => bulk.run(&transport, root, plan, staging, cancel).await?,
                None => {
                    tracing::debug!(destination = remote.destination(), "session cannot carry a bulk transfer; fetching per file");
                    bulk.fallback().run(remote, root, plan, staging, cancel).await?
                },
            },
            Self::PerFileFetch(fetch) => fetch.run(remote, root, plan, staging, cancel).await?,
        }
        Ok(StageReport::collect(plan, staging).await)
    }
}

/// Local staging location of a remote relative path. Paths that would
/// escape the staging directory have none.
pub(crate) fn staged_path(staging: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.trim_start_matches('/'));
    let safe = relative.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (safe && relative.components().next().is_some()).then(|| staging.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::RemotePathRecord;
    use rlogsync_config::RsyncSettings;
    use rlogsync_remote::{MockRemote, Transport};
    use rstest::rstest;

    #[rstest]
    #[case("a/b/rlog", Some("/s/a/b/rlog"))]
    #[case("/a/rlog", Some("/s/a/rlog"))]
    #[case("../rlog", None)]
    #[case("a/../../rlog", None)]
    #[case("", None)]
    fn staging_paths(#[case] relative: &str, #[case] expected: Option<&str>) {
        assert_eq!(staged_path(Path::new("/s"), relative), expected.map(PathBuf::from));
    }

    #[tokio::test]
    async fn report_checks_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/rlog"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("b/rlog")).unwrap();
        let report = StageReport::collect(&plan(&["a/rlog", "b/rlog"]), dir.path()).await;
        assert_eq!(report.requested, 2);
        assert_eq!(report.landed, vec!["a/rlog"]);
        assert_eq!(report.missing, vec!["b/rlog"]);
        assert!(!report.is_complete());
    }

    fn plan(paths: &[&str]) -> TransferPlan {
        TransferPlan {
            needed: paths.iter().map(|p| RemotePathRecord::new(*p, 1)).collect(),
            present: 0,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bulk_stage_reports_what_landed_after_failed_exit() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        let program = crate::fixtures::stub_rsync(dir.path(), "c/rlog", 23);
        let strategy = TransferStrategy::BulkMirror(BulkMirror::new(
            program,
            &RsyncSettings::default(),
            PerFileFetch::default(),
        ));
        let remote = MockRemote::new("comma@tici").with_transport(Transport {
            program: PathBuf::from("ssh"),
            args: vec![],
            destination: "comma@tici".into(),
        });
        let report = strategy
            .stage(&remote, "/r/", &plan(&["a/b/rlog", "c/rlog"]), &staging, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.requested, 2);
        assert_eq!(report.landed, vec!["a/b/rlog"]);
        assert_eq!(report.missing, vec!["c/rlog"]);
        assert_eq!(remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn bulk_stage_without_transport_fetches_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = TransferStrategy::BulkMirror(BulkMirror::new(
            "rlogsync-no-such-rsync",
            &RsyncSettings::default(),
            PerFileFetch::default(),
        ));
        let remote = MockRemote::new("comma@tici")
            .with_file("/r/a/rlog", "a")
            .with_file("/r/b/rlog", "b")
            .failing_fetch("/r/b/rlog");
        let report = strategy
            .stage(&remote, "/r", &plan(&["a/rlog", "b/rlog"]), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.landed, vec!["a/rlog"]);
        assert_eq!(report.missing, vec!["b/rlog"]);
        assert_eq!(remote.fetch_count(), 2);
        assert_eq!(std::fs::read(dir.path().join("a/rlog")).unwrap(), b"a");
    }

    #[tokio::test]
    async fn empty_plan_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        let remote = MockRemote::new("comma@tici");
        let report = TransferStrategy::PerFileFetch(PerFileFetch::default())
            .stage(&remote, "/r", &plan(&[]), &staging, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, StageReport::default());
        assert!(!staging.exists());
    }

    #[test]
    fn per_file_is_always_selectable() {
        let settings = SyncSettings {
            transfer: TransferMethod::PerFile,
            max_in_flight: 2,
            ..SyncSettings::default()
        };
        assert_eq!(TransferStrategy::select(&settings), TransferStrategy::PerFileFetch(PerFileFetch::new(2)));
    }

    #[test]
    fn missing_bulk_tool_falls_back() {
        let mut settings = SyncSettings::default();
        settings.rsync.program = PathBuf::from("rlogsync-no-such-rsync");
        let strategy = TransferStrategy::select(&settings);
        assert_eq!(strategy.name(), "per-file");
    }
}
