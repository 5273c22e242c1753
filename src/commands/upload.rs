use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::StreamExt;
use rlogsync_archive::{ArchivalUploader, BinPacker, UploadEvent, UploadSummary, batch_options, plan_groups, upload};
use rlogsync_config::{Config, UploadBackend, UploadSettings};
use rlogsync_storage::BackendHandle;
use rlogsync_storage::backend::{LocalBackend, RcloneBackend, ReadOnlyBackend};
use std::pin::pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn run(config: &Config, dry_run: bool, cancel: &CancellationToken) -> Result<UploadSummary> {
    let mut backend = open_backend(&config.upload)?;
    if dry_run {
        backend = Arc::new(ReadOnlyBackend::new(backend));
    }
    let packer = BinPacker::new(config.upload.max_folder_size_bytes);
    let groups = plan_groups(&config.sync.archive_dir, &config.sync.marker, &packer)
        .await
        .or_raise(|| ErrorKind::Archive)?;
    tracing::info!(backend = backend.name(), groups = groups.len(), dry_run, "starting upload");

    let uploader = ArchivalUploader::new(backend, batch_options(&config.upload));
    let mut summary = UploadSummary::default();
    let mut events = pin!(upload(&uploader, &groups).take_until(cancel.cancelled()));
    while let Some(event) = events.next().await {
        match &event {
            UploadEvent::GroupUploaded(report) => println!(
                "{}: {} uploaded, {} already present, {} failed",
                report.destination_folder_key,
                report.uploaded,
                report.skipped,
                report.failed.len()
            ),
            UploadEvent::GroupFailed {
                destination_folder_key,
                error,
            } => println!("{destination_folder_key}: failed ({error})"),
            UploadEvent::Started { .. } | UploadEvent::Complete => {},
        }
        summary.record(&event);
    }
    if cancel.is_cancelled() {
        println!("cancelled");
    }
    println!(
        "uploaded {} files in {} groups, {} already present, {} failed files, {} failed groups",
        summary.uploaded,
        summary.groups,
        summary.skipped,
        summary.failed_files,
        summary.failed_groups.len()
    );
    Ok(summary)
}

fn open_backend(settings: &UploadSettings) -> Result<BackendHandle> {
    let backend: BackendHandle = match &settings.backend {
        UploadBackend::Rclone { remote, folder, program } => {
            Arc::new(RcloneBackend::new(remote.as_str(), program.as_path(), remote.as_str(), folder).or_raise(|| ErrorKind::Backend)?)
        },
        UploadBackend::Local { path } => Arc::new(LocalBackend::new("local", path).or_raise(|| ErrorKind::Backend)?),
        #[cfg(feature = "s3")]
        UploadBackend::S3 {
            bucket,
            prefix,
            region,
            endpoint,
            key_id,
            key_secret,
        } => Arc::new(
            rlogsync_storage::backend::S3Backend::new(
                bucket.as_str(),
                bucket.as_str(),
                prefix.clone(),
                region.as_str(),
                endpoint.clone(),
                key_id.as_str(),
                key_secret.as_str(),
            )
            .or_raise(|| ErrorKind::Backend)?,
        ),
        #[cfg(not(feature = "s3"))]
        UploadBackend::S3 { .. } => {
            tracing::error!("this build has no S3 support; rebuild with the `s3` feature");
            exn::bail!(ErrorKind::Backend)
        },
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let settings = UploadSettings {
            backend: UploadBackend::Local {
                path: dir.path().to_path_buf(),
            },
            ..UploadSettings::default()
        };
        assert_eq!(open_backend(&settings).unwrap().name(), "local");
    }

    #[test]
    fn opens_default_rclone_backend() {
        assert_eq!(open_backend(&UploadSettings::default()).unwrap().name(), "gdrive");
    }
}
