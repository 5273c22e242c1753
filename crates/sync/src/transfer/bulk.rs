//! One `rsync` run over the whole needed set.

use crate::delta::TransferPlan;
use crate::error::{ErrorKind, Result};
use crate::transfer::PerFileFetch;
use exn::ResultExt;
use rlogsync_config::RsyncSettings;
use rlogsync_remote::Transport;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Resume directory rsync keeps inside each destination directory.
pub const PARTIAL_DIR: &str = ".rsync-partial";
const DIAGNOSTIC_LINES: usize = 5;

/// Mirrors the needed files with an external `rsync`, tunnelled through the
/// device session's transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkMirror {
    program: PathBuf,
    compress_level: u8,
    bandwidth_limit_kbps: u32,
    whole_file: bool,
    fallback: PerFileFetch,
}

impl BulkMirror {
    /// `fallback` is used for sessions that cannot carry an rsync transport.
    pub fn new(program: impl Into<PathBuf>, settings: &RsyncSettings, fallback: PerFileFetch) -> Self {
        Self {
            program: program.into(),
            compress_level: settings.compress_level,
            bandwidth_limit_kbps: settings.bandwidth_limit_kbps,
            whole_file: settings.whole_file,
            fallback,
        }
    }

    pub(crate) fn fallback(&self) -> &PerFileFetch {
        &self.fallback
    }

    /// Filter rules that let exactly the needed files (and the directories
    /// leading to them) through.
    ///
    /// ```text
    /// + /a/
    /// + /a/b/
    /// + /a/b/rlog
    /// - *
    /// ```
    pub fn filter_rules(plan: &TransferPlan) -> String {
        let mut directories = BTreeSet::new();
        let mut files = BTreeSet::new();
        for path in plan.paths() {
            let path = path.trim_matches('/');
            let mut end = 0;
            while let Some(offset) = path[end..].find('/') {
                end += offset;
                directories.insert(&path[..end]);
                end += 1;
            }
            files.insert(path);
        }
        let mut rules = String::new();
        for directory in directories {
            rules.push_str(&format!("+ /{}/\n", escape_pattern(directory)));
        }
        for file in files {
            rules.push_str(&format!("+ /{}\n", escape_pattern(file)));
        }
        rules.push_str("- *\n");
        rules
    }

    fn args(&self, transport: &Transport, filter: &Path, root: &str, staging: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "--recursive",
            "--times",
            "--copy-links",
            "--protect-args",
            "--partial",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(format!("--partial-dir={PARTIAL_DIR}").into());
        if self.compress_level > 0 {
            args.push("--compress".into());
            args.push(format!("--compress-level={}", self.compress_level).into());
        }
        if self.bandwidth_limit_kbps > 0 {
            args.push(format!("--bwlimit={}", self.bandwidth_limit_kbps).into());
        }
        args.push(
            match self.whole_file {
                true => "--whole-file",
                false => "--no-whole-file",
            }
            .into(),
        );
        let mut merge = OsString::from("--filter=merge ");
        merge.push(filter);
        args.push(merge);
        args.push(format!("--rsh={}", transport.shell_command()).into());
        args.push(format!("{}:{root}/", transport.destination).into());
        let mut destination = staging.as_os_str().to_owned();
        destination.push("/");
        args.push(destination);
        args
    }

    /// Run the transfer. A non-zero exit is logged, not raised: rsync reports
    /// per-file hiccups that way even when most of the mirror succeeded.
    pub(crate) async fn run(
        &self,
        transport: &Transport,
        root: &str,
        plan: &TransferPlan,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let filter = tempfile::NamedTempFile::new().or_raise(|| ErrorKind::Io)?;
        tokio::fs::write(filter.path(), Self::filter_rules(plan)).await.or_raise(|| ErrorKind::Io)?;

        tracing::info!(destination = %transport.destination, files = plan.len(), bytes = plan.total_bytes(), "starting bulk transfer");
        let mut child = Command::new(&self.program)
            .args(self.args(transport, filter.path(), root, staging))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .or_raise(|| ErrorKind::Transfer(transport.destination.clone()))?;

        let stderr = child.stderr.take();
        let diagnostics = tokio::spawn(async move {
            let mut tail = Vec::new();
            let Some(stderr) = stderr else {
                return tail;
            };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "rlogsync_sync::rsync", "{line}");
                if tail.len() == DIAGNOSTIC_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail
        });

        let status = tokio::select! {
            status = child.wait() => Some(status),
            () = cancel.cancelled() => None,
        };
        let Some(status) = status else {
            tracing::warn!(destination = %transport.destination, "cancelling bulk transfer");
            if let Err(err) = child.start_kill() {
                tracing::debug!(error = %err, "bulk transfer already exited");
            }
            let _ = child.wait().await;
            exn::bail!(ErrorKind::Cancelled);
        };
        let status = status.or_raise(|| ErrorKind::Transfer(transport.destination.clone()))?;
        let tail = diagnostics.await.unwrap_or_default();
        match status.success() {
            true => tracing::debug!(destination = %transport.destination, "bulk transfer finished"),
            false => tracing::warn!(
                destination = %transport.destination,
                status = ?status.code(),
                stderr = tail.join(" | "),
                "bulk transfer exited with warnings; checking what landed"
            ),
        }
        Ok(())
    }
}

/// Escape rsync wildcard characters so a path matches only itself. rsync
/// only honours backslash escapes in patterns that contain a wildcard, so a
/// path without one is used verbatim.
fn escape_pattern(path: &str) -> String {
    if !path.contains(['*', '?', '[']) {
        return path.to_string();
    }
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '*' | '?' | '[' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::RemotePathRecord;

    fn plan(paths: &[&str]) -> TransferPlan {
        TransferPlan {
            needed: paths.iter().map(|p| RemotePathRecord::new(*p, 1)).collect(),
            present: 0,
        }
    }

    fn transport() -> Transport {
        Transport {
            program: PathBuf::from("ssh"),
            args: vec!["-p".into(), "8022".into()],
            destination: "comma@tici".into(),
        }
    }

    #[test]
    fn filter_includes_ancestors_and_files() {
        let rules = BulkMirror::filter_rules(&plan(&["a/b/rlog", "a/b/rlog.bz2", "c/rlog"]));
        assert_eq!(rules, "+ /a/\n+ /a/b/\n+ /c/\n+ /a/b/rlog\n+ /a/b/rlog.bz2\n+ /c/rlog\n- *\n");
    }

    #[test]
    fn filter_escapes_wildcards() {
        let rules = BulkMirror::filter_rules(&plan(&["a[1]/r*log"]));
        assert_eq!(rules, "+ /a\\[1]/\n+ /a\\[1]/r\\*log\n- *\n");
    }

    #[test]
    fn backslash_without_wildcard_is_literal() {
        let rules = BulkMirror::filter_rules(&plan(&["a\\b/rlog", "c\\d*/rlog"]));
        assert_eq!(rules, "+ /a\\b/\n+ /c\\\\d\\*/\n+ /a\\b/rlog\n+ /c\\\\d\\*/rlog\n- *\n");
    }

    #[test]
    fn arguments() {
        let settings = RsyncSettings {
            compress_level: 3,
            bandwidth_limit_kbps: 500,
            whole_file: false,
            ..RsyncSettings::default()
        };
        let bulk = BulkMirror::new("rsync", &settings, PerFileFetch::default());
        let args = bulk.args(&transport(), Path::new("/tmp/filter"), "/data/realdata", Path::new("/s"));
        let args: Vec<String> = args.into_iter().map(|a| a.into_string().unwrap()).collect();
        assert!(args.contains(&"--compress-level=3".to_string()));
        assert!(args.contains(&"--bwlimit=500".to_string()));
        assert!(args.contains(&"--no-whole-file".to_string()));
        assert!(args.contains(&"--filter=merge /tmp/filter".to_string()));
        assert!(args.contains(&"--rsh=ssh -p 8022".to_string()));
        assert_eq!(&args[args.len() - 2..], ["comma@tici:/data/realdata/", "/s/"]);
    }

    #[test]
    fn default_arguments_omit_optional_knobs() {
        let bulk = BulkMirror::new("rsync", &RsyncSettings::default(), PerFileFetch::default());
        let args = bulk.args(&transport(), Path::new("/f"), "/r", Path::new("/s"));
        let args: Vec<String> = args.into_iter().map(|a| a.into_string().unwrap()).collect();
        assert!(args.contains(&"--compress-level=1".to_string()));
        assert!(args.contains(&"--whole-file".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--bwlimit")));
    }

    #[cfg(unix)]
    mod stub {
        use super::*;
        use crate::fixtures::stub_rsync;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        #[tokio::test]
        async fn partial_exit_is_not_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let staging = dir.path().join("staging");
            std::fs::create_dir_all(&staging).unwrap();
            let program = stub_rsync(dir.path(), "c/rlog", 23);
            let bulk = BulkMirror::new(program, &RsyncSettings::default(), PerFileFetch::default());
            let plan = plan(&["a/b/rlog", "c/rlog"]);
            bulk.run(&transport(), "/r", &plan, &staging, &CancellationToken::new()).await.unwrap();
            assert_eq!(std::fs::read(staging.join("a/b/rlog")).unwrap(), b"data");
            assert!(!staging.join("c/rlog").exists());
        }

        #[tokio::test]
        async fn cancellation_kills_transfer() {
            let dir = tempfile::tempdir().unwrap();
            let program = dir.path().join("rsync");
            std::fs::write(&program, "#!/bin/sh\nexec sleep 30\n").unwrap();
            std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
            let bulk = BulkMirror::new(program, &RsyncSettings::default(), PerFileFetch::default());
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            });
            let started = std::time::Instant::now();
            let err = bulk
                .run(&transport(), "/r", &plan(&["a/rlog"]), dir.path(), &cancel)
                .await
                .unwrap_err();
            assert!(matches!(&*err, ErrorKind::Cancelled));
            assert!(started.elapsed() < Duration::from_secs(20));
        }

        #[tokio::test]
        async fn missing_program_is_a_transfer_error() {
            let dir = tempfile::tempdir().unwrap();
            let bulk = BulkMirror::new(dir.path().join("nope"), &RsyncSettings::default(), PerFileFetch::default());
            let err = bulk
                .run(&transport(), "/r", &plan(&["a/rlog"]), dir.path(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(&*err, ErrorKind::Transfer(dest) if dest == "comma@tici"));
        }
    }
}
