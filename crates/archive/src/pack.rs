//! Splitting a dongle folder into upload groups that fit the remote's folder
//! size limit.

use crate::error::Result;
use crate::walk;
use std::path::{Path, PathBuf};

/// A local archive file considered for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileEntry {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl LocalFileEntry {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Self { path, name, size }
    }

    /// Regular files directly inside `dir` whose name contains `marker`,
    /// sorted by name.
    pub async fn collect(dir: &Path, marker: &str) -> Result<Vec<Self>> {
        let mut entries: Vec<Self> = walk::files(dir)
            .await?
            .into_iter()
            .filter(|found| found.path.parent() == Some(dir))
            .map(|found| Self::new(found.path, found.size))
            .filter(|entry| entry.name.contains(marker))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// A set of files uploaded together into one remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivalGroup {
    /// `<label>/<dongle>` for the first group, `<label>/<dongle>_partN` after.
    pub destination_folder_key: String,
    pub members: Vec<LocalFileEntry>,
    pub total_bytes: u64,
}

impl ArchivalGroup {
    fn new(destination_folder_key: String) -> Self {
        Self {
            destination_folder_key,
            members: Vec::new(),
            total_bytes: 0,
        }
    }

    fn push(&mut self, entry: LocalFileEntry) {
        self.total_bytes += entry.size;
        self.members.push(entry);
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.members.iter().map(|m| m.path.clone()).collect()
    }
}

/// Deterministic first-fit-in-order packing.
///
/// Files are taken in name order and never reordered, so the same archive
/// always packs the same way and files don't move between remote folders
/// from one run to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinPacker {
    capacity: u64,
}

impl BinPacker {
    pub fn new(capacity: u64) -> Self {
        Self { capacity }
    }

    /// Pack `files` into groups keyed under `base_key`.
    ///
    /// A file larger than the capacity gets a group of its own.
    pub fn pack(&self, base_key: &str, mut files: Vec<LocalFileEntry>) -> Vec<ArchivalGroup> {
        files.sort_by(|a, b| a.name.cmp(&b.name));
        let mut groups = Vec::new();
        let mut current = ArchivalGroup::new(base_key.to_string());
        for file in files {
            if !current.members.is_empty() && current.total_bytes.saturating_add(file.size) > self.capacity {
                let key = format!("{base_key}_part{}", groups.len() + 2);
                groups.push(std::mem::replace(&mut current, ArchivalGroup::new(key)));
            }
            current.push(file);
        }
        if !current.members.is_empty() {
            groups.push(current);
        }
        groups
    }
}

/// Pack every `<label>/<dongle>` folder of the archive.
pub async fn plan_groups(archive_dir: &Path, marker: &str, packer: &BinPacker) -> Result<Vec<ArchivalGroup>> {
    let mut groups = Vec::new();
    for (label, label_dir) in walk::subdirs(archive_dir).await? {
        for (dongle, dongle_dir) in walk::subdirs(&label_dir).await? {
            let files = LocalFileEntry::collect(&dongle_dir, marker).await?;
            let packed = packer.pack(&format!("{label}/{dongle}"), files);
            tracing::debug!(label, dongle, groups = packed.len(), "packed dongle folder");
            groups.extend(packed);
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry(name: &str, size: u64) -> LocalFileEntry {
        LocalFileEntry::new(format!("/archive/tici/D1/{name}"), size)
    }

    fn layout(groups: &[ArchivalGroup]) -> Vec<(String, Vec<String>)> {
        groups
            .iter()
            .map(|g| {
                (
                    g.destination_folder_key.clone(),
                    g.members.iter().map(|m| m.name.clone()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn splits_when_capacity_is_exceeded() {
        let files = vec![entry("D1|c--rlog", 40), entry("D1|a|b--rlog.bz2", 30), entry("D1|a|b--rlog", 30)];
        let groups = BinPacker::new(80).pack("tici/D1", files);
        assert_eq!(
            layout(&groups),
            vec![
                ("tici/D1".to_string(), vec!["D1|a|b--rlog".to_string(), "D1|a|b--rlog.bz2".to_string()]),
                ("tici/D1_part2".to_string(), vec!["D1|c--rlog".to_string()]),
            ]
        );
        assert_eq!(groups[0].total_bytes, 60);
        assert_eq!(groups[1].total_bytes, 40);
    }

    #[test]
    fn oversize_file_gets_its_own_group() {
        let files = vec![entry("a", 10), entry("b", 500), entry("c", 10)];
        let groups = BinPacker::new(100).pack("tici/D1", files);
        assert_eq!(
            layout(&groups),
            vec![
                ("tici/D1".to_string(), vec!["a".to_string()]),
                ("tici/D1_part2".to_string(), vec!["b".to_string()]),
                ("tici/D1_part3".to_string(), vec!["c".to_string()]),
            ]
        );
    }

    #[rstest]
    #[case(vec![], 0)]
    #[case(vec![10, 10, 10], 1)]
    #[case(vec![50, 50, 1], 2)]
    #[case(vec![60, 60, 60, 60], 4)]
    fn every_file_is_packed_once(#[case] sizes: Vec<u64>, #[case] expected_groups: usize) {
        let files: Vec<_> = sizes.iter().enumerate().map(|(i, s)| entry(&format!("f{i:02}"), *s)).collect();
        let groups = BinPacker::new(100).pack("k", files.clone());
        assert_eq!(groups.len(), expected_groups);
        let packed: Vec<_> = groups.iter().flat_map(|g| g.members.clone()).collect();
        assert_eq!(packed, files);
        assert!(groups.iter().all(|g| g.total_bytes <= 100 || g.members.len() == 1));
    }

    #[tokio::test]
    async fn plans_every_dongle_folder() {
        let dir = tempfile::tempdir().unwrap();
        for (folder, name) in [("tici/D1", "D1--rlog"), ("tici/D2", "D2--rlog.zst"), ("mici/D3", "D3--rlog")] {
            std::fs::create_dir_all(dir.path().join(folder)).unwrap();
            std::fs::write(dir.path().join(folder).join(name), "x").unwrap();
        }
        std::fs::write(dir.path().join("tici/D1/notes.txt"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("tici/D1/.staging")).unwrap();

        let groups = plan_groups(dir.path(), "rlog", &BinPacker::new(100)).await.unwrap();
        assert_eq!(
            layout(&groups),
            vec![
                ("mici/D3".to_string(), vec!["D3--rlog".to_string()]),
                ("tici/D1".to_string(), vec!["D1--rlog".to_string()]),
                ("tici/D2".to_string(), vec!["D2--rlog.zst".to_string()]),
            ]
        );
    }
}
