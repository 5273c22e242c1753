//! Uploading packed groups to remote storage.
//!
//! Each group is checked against a fresh listing of its destination folder
//! first, so files already there are skipped rather than sent again.

use crate::error::{Error, ErrorKind, Result};
use crate::pack::ArchivalGroup;
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use rlogsync_config::UploadSettings;
use rlogsync_storage::{BackendHandle, BatchOptions};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// What happened to one group's members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub destination_folder_key: String,
    pub uploaded: usize,
    /// Already present remotely, by name.
    pub skipped: usize,
    pub failed: Vec<PathBuf>,
}

/// Uploads [`ArchivalGroup`]s into their remote folders, skipping files the
/// remote already has.
pub struct ArchivalUploader {
    backend: BackendHandle,
    options: BatchOptions,
}

impl ArchivalUploader {
    pub fn new(backend: BackendHandle, options: BatchOptions) -> Self {
        Self { backend, options }
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// Upload whatever part of `group` is missing from its remote folder.
    ///
    /// The remote folder is listed fresh for every group. Names are compared,
    /// sizes are not.
    #[tracing::instrument(skip_all, fields(backend = self.backend.name(), folder = %group.destination_folder_key))]
    pub async fn upload_group(&self, group: &ArchivalGroup) -> Result<GroupReport> {
        let folder = Path::new(&group.destination_folder_key);
        let existing: HashSet<String> = self
            .backend
            .list(Some(folder))
            .await
            .or_raise(|| ErrorKind::RemoteListing(group.destination_folder_key.clone()))?
            .iter()
            .filter_map(|info| info.file_name())
            .map(str::to_string)
            .collect();

        let mut report = GroupReport {
            destination_folder_key: group.destination_folder_key.clone(),
            ..GroupReport::default()
        };
        let pending: Vec<PathBuf> = group
            .members
            .iter()
            .filter(|member| match existing.contains(&member.name) {
                true => {
                    report.skipped += 1;
                    false
                },
                false => true,
            })
            .map(|member| member.path.clone())
            .collect();
        if pending.is_empty() {
            tracing::debug!(skipped = report.skipped, "nothing to upload");
            return Ok(report);
        }

        tracing::info!(files = pending.len(), skipped = report.skipped, "uploading group");
        let outcome = self
            .backend
            .upload_batch(&pending, folder, &self.options)
            .await
            .or_raise(|| ErrorKind::Upload(group.destination_folder_key.clone()))?;
        for path in &outcome.failed {
            tracing::warn!(path = %path.display(), "file was not uploaded");
        }
        report.uploaded = outcome.uploaded.len();
        report.failed = outcome.failed;
        Ok(report)
    }
}

/// Batch knobs from the upload configuration.
pub fn batch_options(settings: &UploadSettings) -> BatchOptions {
    BatchOptions {
        transfers: settings.transfers,
        checkers: settings.checkers,
        retries: settings.retries,
        low_level_retries: settings.low_level_retries,
        tps_limit: settings.tps_limit,
    }
}

/// Progress events emitted by [`upload`].
///
/// [`Started`](Self::Started) comes first and [`Complete`](Self::Complete)
/// last; in between, one [`GroupUploaded`](Self::GroupUploaded) or
/// [`GroupFailed`](Self::GroupFailed) per group, in group order.
#[derive(Debug)]
pub enum UploadEvent {
    Started { groups: usize },
    GroupUploaded(GroupReport),
    /// The group could not be uploaded at all. Later groups still run.
    GroupFailed { destination_folder_key: String, error: Error },
    Complete,
}

pub fn upload<'a>(uploader: &'a ArchivalUploader, groups: &'a [ArchivalGroup]) -> impl Stream<Item = UploadEvent> + 'a {
    stream!({
        yield UploadEvent::Started { groups: groups.len() };
        for group in groups {
            match uploader.upload_group(group).await {
                Ok(report) => yield UploadEvent::GroupUploaded(report),
                Err(error) => {
                    tracing::error!(folder = %group.destination_folder_key, error = %error, "group upload failed");
                    yield UploadEvent::GroupFailed {
                        destination_folder_key: group.destination_folder_key.clone(),
                        error,
                    };
                },
            }
        }
        yield UploadEvent::Complete;
    })
}

/// Run-level upload totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub groups: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed_files: usize,
    pub failed_groups: Vec<String>,
}

impl UploadSummary {
    pub fn record(&mut self, event: &UploadEvent) {
        match event {
            UploadEvent::Started { groups } => self.groups = *groups,
            UploadEvent::GroupUploaded(report) => {
                self.uploaded += report.uploaded;
                self.skipped += report.skipped;
                self.failed_files += report.failed.len();
            },
            UploadEvent::GroupFailed {
                destination_folder_key, ..
            } => self.failed_groups.push(destination_folder_key.clone()),
            UploadEvent::Complete => {},
        }
    }
}
