//! Storage backend driving the `rclone` executable.
//!
//! Any remote `rclone` has been configured for (Google Drive, Dropbox, ...)
//! can hold the archive. Listings use `lsjson`; batches are staged into a
//! temporary directory and pushed with a single `rclone copy`, which owns the
//! per-file fan-out and retries.

use crate::backend::{BatchOptions, BatchOutcome, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::path::normalize;
use crate::{FileInfo, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;
use tokio::process::Command;

// rclone exit codes for "directory not found" and "file not found".
const EXIT_DIR_NOT_FOUND: i32 = 3;
const EXIT_FILE_NOT_FOUND: i32 = 4;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    path: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    mod_time: Option<String>,
    #[serde(default)]
    is_dir: bool,
}
impl ListEntry {
    fn into_file_info(self, base: Option<&Path>) -> Option<FileInfo> {
        if self.is_dir {
            return None;
        }
        let modified = self
            .mod_time
            .as_deref()
            .and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let path = match base {
            Some(base) => base.join(&self.path),
            None => PathBuf::from(&self.path),
        };
        Some(FileInfo::new(path, self.size.max(0) as u64, modified))
    }
}

/// Storage backend for an `rclone` remote.
///
/// Paths are relative to `remote:folder`.
///
/// ```no_run
/// use rlogsync_storage::backend::RcloneBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = RcloneBackend::new("gdrive", "rclone", "gdrive", "rlogs")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RcloneBackend {
    name: String,
    program: PathBuf,
    remote: String,
    folder: Option<PathBuf>,
}
impl RcloneBackend {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<PathBuf>,
        remote: impl Into<String>,
        folder: impl AsRef<Path>,
    ) -> Result<Self> {
        let remote = remote.into();
        if remote.is_empty() || remote.contains(':') {
            exn::bail!(ErrorKind::Remote(format!("invalid rclone remote name `{remote}`")));
        }
        let folder = folder.as_ref();
        let folder = match folder.as_os_str().is_empty() {
            true => None,
            false => Some(normalize(folder)?),
        };
        Ok(Self {
            name: name.into(),
            program: program.into(),
            remote,
            folder,
        })
    }

    /// `remote:folder/path` as understood by rclone.
    fn target(&self, path: Option<&Path>) -> Result<String> {
        let path = path.map(normalize).transpose()?;
        let joined = match (&self.folder, path) {
            (Some(folder), Some(path)) => folder.join(path),
            (Some(folder), None) => folder.clone(),
            (None, Some(path)) => path,
            (None, None) => PathBuf::new(),
        };
        let joined = joined.to_str().ok_or_raise(|| ErrorKind::InvalidKey(joined.clone()))?;
        Ok(format!("{}:{}", self.remote, joined))
    }

    async fn run(&self, args: Vec<OsString>) -> Result<Output> {
        tracing::debug!(backend = %self.name, program = %self.program.display(), ?args, "running rclone");
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::Unavailable(self.program.display().to_string()),
                _ => ErrorKind::Io(e),
            })?;
        Ok(child.wait_with_output().await.map_err(ErrorKind::Io)?)
    }

    fn check(&self, output: Output, path: &Path) -> Result<Output> {
        if output.status.success() {
            return Ok(output);
        }
        match output.status.code() {
            Some(EXIT_DIR_NOT_FOUND | EXIT_FILE_NOT_FOUND) => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no output");
                exn::bail!(ErrorKind::Remote(format!("rclone exited with {}: {}", output.status, reason.trim())))
            },
        }
    }

    async fn lsjson(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        let base = prefix.map(normalize).transpose()?;
        let target = self.target(base.as_deref())?;
        let args = vec!["lsjson".into(), "--recursive".into(), "--files-only".into(), target.into()];
        let output = self.run(args).await?;
        match self.check(output, base.as_deref().unwrap_or(Path::new(""))) {
            Ok(output) => parse_listing(&output.stdout, base.as_deref()),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn batch_args(options: &BatchOptions) -> Vec<OsString> {
        [
            ("--transfers", options.transfers.to_string()),
            ("--checkers", options.checkers.to_string()),
            ("--tpslimit", options.tps_limit.to_string()),
            ("--retries", options.retries.to_string()),
            ("--low-level-retries", options.low_level_retries.to_string()),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [OsString::from(flag), OsString::from(value)])
        .collect()
    }
}

fn parse_listing(stdout: &[u8], base: Option<&Path>) -> Result<Vec<FileInfo>> {
    let entries: Vec<ListEntry> = serde_json::from_slice(stdout)
        .or_raise(|| ErrorKind::Remote("unreadable rclone listing".to_string()))?;
    Ok(entries.into_iter().filter_map(|entry| entry.into_file_info(base)).collect())
}

#[async_trait]
impl StorageBackend for RcloneBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        Box::pin(stream! {
            match self.lsjson(prefix).await {
                Ok(files) => for file in files { yield Ok(file) },
                Err(e) => yield Err(e),
            }
        })
    }

    async fn upload(&self, local: &Path, path: &Path) -> Result<()> {
        let path = normalize(path)?;
        let args = vec!["copyto".into(), local.as_os_str().to_owned(), self.target(Some(path.as_path()))?.into()];
        self.check(self.run(args).await?, &path)?;
        Ok(())
    }

    async fn upload_batch(&self, files: &[PathBuf], dest: &Path, options: &BatchOptions) -> Result<BatchOutcome> {
        let dest = normalize(dest)?;
        let staging = tempfile::Builder::new().prefix("rlogsync-upload-").tempdir().map_err(ErrorKind::Io)?;
        let mut staged = Vec::with_capacity(files.len());
        let mut outcome = BatchOutcome::default();
        for file in files {
            let Some(name) = file.file_name() else {
                outcome.failed.push(file.clone());
                continue;
            };
            let link = staging.path().join(name);
            // Hard links keep multi-gigabyte batches off the disk twice.
            let linked = match fs::hard_link(file, &link).await {
                Ok(()) => Ok(()),
                Err(_) => fs::copy(file, &link).await.map(|_| ()),
            };
            match linked {
                Ok(()) => staged.push(file.clone()),
                Err(err) => {
                    tracing::warn!(backend = %self.name, path = %file.display(), error = %err, "could not stage file for upload");
                    outcome.failed.push(file.clone());
                },
            }
        }
        if staged.is_empty() {
            return Ok(outcome);
        }

        let mut args: Vec<OsString> = vec!["copy".into(), staging.path().as_os_str().to_owned(), self.target(Some(dest.as_path()))?.into()];
        args.extend(Self::batch_args(options));
        let result = self.run(args).await.and_then(|output| self.check(output, &dest));
        match result {
            Ok(_) => outcome.uploaded.extend(staged),
            Err(err) if matches!(&*err, ErrorKind::Unavailable(_)) => return Err(err),
            Err(err) => {
                tracing::warn!(backend = %self.name, dest = %dest.display(), files = staged.len(), error = %err, "batch upload failed");
                outcome.failed.extend(staged);
            },
        }
        outcome.failed.sort();
        Ok(outcome)
    }
}
