//! Which remote files still need to be transferred.

use crate::inventory::{LocalInventory, RemotePathRecord};
use crate::naming::NamingScheme;
use std::collections::BTreeSet;

/// Files to transfer in this run. Built fresh every run and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    /// Sorted by relative path, without duplicates.
    pub needed: Vec<RemotePathRecord>,
    /// Remote files skipped because the archive already has them.
    pub present: usize,
}
impl TransferPlan {
    pub fn is_empty(&self) -> bool {
        self.needed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.needed.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.needed.iter().map(|r| r.size).sum()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.needed.iter().map(|r| r.relative_path.as_str())
    }
}

/// Compares a device listing against the archive for one dongle.
pub struct DeltaComputer<'a> {
    naming: &'a NamingScheme,
    dongle_id: &'a str,
}

impl<'a> DeltaComputer<'a> {
    pub fn new(naming: &'a NamingScheme, dongle_id: &'a str) -> Self {
        Self { naming, dongle_id }
    }

    /// A remote file is needed exactly when its canonical name is not
    /// present in `local`.
    pub fn compute_needed(
        &self,
        remote: impl IntoIterator<Item = RemotePathRecord>,
        local: &LocalInventory,
    ) -> TransferPlan {
        let mut needed = BTreeSet::new();
        let mut present = 0;
        for record in remote {
            let identity = self.naming.canonicalize(self.dongle_id, &record.relative_path);
            match local.contains(&identity) {
                true => present += 1,
                false => {
                    tracing::trace!(path = %record.relative_path, identity, "needed");
                    needed.insert(record);
                },
            }
        }
        TransferPlan {
            needed: needed.into_iter().collect(),
            present,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(paths: &[&str]) -> Vec<RemotePathRecord> {
        paths.iter().map(|p| RemotePathRecord::new(*p, 10)).collect()
    }

    #[test]
    fn empty_remote_is_empty_plan() {
        let naming = NamingScheme::default();
        let plan = DeltaComputer::new(&naming, "D1").compute_needed(vec![], &LocalInventory::default());
        assert!(plan.is_empty());
        assert_eq!(plan.present, 0);
    }

    #[test]
    fn everything_needed_for_empty_archive() {
        let naming = NamingScheme::default();
        let plan = DeltaComputer::new(&naming, "D1")
            .compute_needed(records(&["c/rlog", "a/b/rlog", "a/b/rlog.bz2"]), &LocalInventory::default());
        assert_eq!(plan.paths().collect::<Vec<_>>(), vec!["a/b/rlog", "a/b/rlog.bz2", "c/rlog"]);
        assert_eq!(plan.total_bytes(), 30);
    }

    #[test]
    fn present_files_are_never_needed() {
        let naming = NamingScheme::default();
        let remote = records(&["a/b/rlog", "a/b/rlog.bz2", "c/rlog", "d/rlog"]);
        let local: LocalInventory = remote
            .iter()
            .take(3)
            .map(|r| naming.canonicalize("D1", &r.relative_path))
            .collect();
        let plan = DeltaComputer::new(&naming, "D1").compute_needed(remote, &local);
        assert_eq!(plan.paths().collect::<Vec<_>>(), vec!["d/rlog"]);
        assert_eq!(plan.present, 3);
    }

    #[test]
    fn compressed_copy_counts_as_present() {
        let naming = NamingScheme::default();
        let local: LocalInventory = ["D1|a--rlog.zst"].into_iter().collect();
        let plan = DeltaComputer::new(&naming, "D1").compute_needed(records(&["a/rlog"]), &local);
        assert!(plan.is_empty());
    }

    #[test]
    fn device_bzip2_log_does_not_hide_plain_log() {
        let naming = NamingScheme::default();
        let local: LocalInventory = ["D1|a|b--rlog.bz2"].into_iter().collect();
        let plan = DeltaComputer::new(&naming, "D1").compute_needed(records(&["a/b/rlog", "a/b/rlog.bz2"]), &local);
        assert_eq!(plan.paths().collect::<Vec<_>>(), vec!["a/b/rlog"]);
        assert_eq!(plan.present, 1);
    }

    #[test]
    fn other_dongle_is_not_present() {
        let naming = NamingScheme::default();
        let local: LocalInventory = ["D2|a--rlog"].into_iter().collect();
        let plan = DeltaComputer::new(&naming, "D1").compute_needed(records(&["a/rlog"]), &local);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn duplicate_records_collapse() {
        let naming = NamingScheme::default();
        let plan = DeltaComputer::new(&naming, "D1")
            .compute_needed(records(&["a/rlog", "a/rlog"]), &LocalInventory::default());
        assert_eq!(plan.len(), 1);
    }
}
