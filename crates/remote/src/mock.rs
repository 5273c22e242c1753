//! In-memory remote device for testing.

use crate::error::{ErrorKind, Result};
use crate::{CommandOutput, EntryStream, RemoteAccess, RemoteEntry, Transport, part_path};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory remote device for testing.
///
/// Files are keyed by absolute remote path. Directories are implied by the
/// files beneath them.
///
/// ```
/// use rlogsync_remote::{MockRemote, RemoteAccess};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let remote = MockRemote::new("comma@tici")
///     .with_file("/data/params/d/DongleId", "1a2b3c4d\n");
/// assert_eq!(remote.read_to_string("/data/params/d/DongleId").await?.trim(), "1a2b3c4d");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockRemote {
    destination: String,
    files: BTreeMap<String, Vec<u8>>,
    commands: HashMap<String, CommandOutput>,
    failing_fetches: HashSet<String>,
    failing_walk: bool,
    dropped: bool,
    transport: Option<Transport>,
    fetches: AtomicUsize,
    fetched: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockRemote {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), data.into());
        self
    }

    /// Answer `command` with a canned successful output.
    pub fn with_command(mut self, command: impl Into<String>, stdout: impl Into<String>) -> Self {
        let output = CommandOutput {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        };
        self.commands.insert(command.into(), output);
        self
    }

    /// Fetching this absolute remote path fails.
    pub fn failing_fetch(mut self, path: impl Into<String>) -> Self {
        self.failing_fetches.insert(path.into());
        self
    }

    /// Every walk fails as if the listing command broke.
    pub fn failing_walk(mut self) -> Self {
        self.failing_walk = true;
        self
    }

    /// Reads fail as if the connection went away under us.
    pub fn dropped(mut self) -> Self {
        self.dropped = true;
        self
    }

    /// Number of fetch calls, successful or not.
    /// Offer `transport` to bulk transfer tools.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Remote paths successfully fetched, in completion order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn entries_under(&self, root: &str) -> Vec<RemoteEntry> {
        let root = root.trim_end_matches('/');
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (path, data) in &self.files {
            let Some(relative) = path.strip_prefix(root).and_then(|p| p.strip_prefix('/')) else {
                continue;
            };
            let mut ancestor = String::new();
            let segments: Vec<&str> = relative.split('/').collect();
            for segment in &segments[..segments.len() - 1] {
                if !ancestor.is_empty() {
                    ancestor.push('/');
                }
                ancestor.push_str(segment);
                dirs.insert(ancestor.clone());
            }
            entries.push(RemoteEntry::file(relative, data.len() as u64));
        }
        dirs.into_iter().map(RemoteEntry::dir).chain(entries).collect()
    }
}

#[async_trait]
impl RemoteAccess for MockRemote {
    fn destination(&self) -> &str {
        &self.destination
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        Ok(self.commands.get(command).cloned().unwrap_or_else(|| CommandOutput {
            status: Some(127),
            stdout: String::new(),
            stderr: format!("sh: {command}: not found"),
        }))
    }

    fn walk<'a>(&'a self, root: &'a str) -> EntryStream<'a> {
        Box::pin(stream! {
            if self.failing_walk {
                yield Err(exn::Exn::from(ErrorKind::CommandFailed(format!("find {root}"))));
            } else {
                for entry in self.entries_under(root) {
                    yield Ok(entry);
                }
            }
        })
    }

    async fn fetch(&self, remote: &str, local: &Path) -> Result<u64> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_fetches.contains(remote) {
            exn::bail!(ErrorKind::CommandFailed(format!("injected failure fetching {remote}")));
        }
        let data = self.files.get(remote).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(remote.to_string())))?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|_| ErrorKind::Io)?;
        }
        let part = part_path(local);
        tokio::fs::write(&part, data).await.map_err(|_| ErrorKind::Io)?;
        tokio::fs::rename(&part, local).await.map_err(|_| ErrorKind::Io)?;
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(remote.to_string());
        }
        Ok(data.len() as u64)
    }

    async fn read_to_string(&self, remote: &str) -> Result<String> {
        if self.dropped {
            exn::bail!(ErrorKind::Connection(self.destination.clone()));
        }
        let data = self.files.get(remote).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(remote.to_string())))?;
        Ok(String::from_utf8_lossy(data).into_owned())
    }

    fn transport(&self) -> Option<Transport> {
        self.transport.clone()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn walk_lists_dirs_and_files() {
        let remote = MockRemote::new("comma@tici")
            .with_file("/root/a/b/rlog", "x")
            .with_file("/root/c/qlog", "yy")
            .with_file("/elsewhere/rlog", "z");
        let entries: Vec<RemoteEntry> = remote.walk("/root/").try_collect().await.unwrap();
        assert_eq!(
            entries,
            vec![
                RemoteEntry::dir("a"),
                RemoteEntry::dir("a/b"),
                RemoteEntry::dir("c"),
                RemoteEntry::file("a/b/rlog", 1),
                RemoteEntry::file("c/qlog", 2),
            ]
        );
    }

    #[tokio::test]
    async fn fetch_writes_file_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new("comma@tici").with_file("/root/a/rlog", "payload");
        let local = dir.path().join("a/rlog");
        assert_eq!(remote.fetch("/root/a/rlog", &local).await.unwrap(), 7);
        assert_eq!(std::fs::read(&local).unwrap(), b"payload");
        assert!(!part_path(&local).exists());
        assert_eq!(remote.fetched(), vec!["/root/a/rlog".to_string()]);
        assert!(remote.fetch("/root/missing", &dir.path().join("m")).await.is_err());
        assert_eq!(remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn canned_commands_and_close() {
        let remote = MockRemote::new("comma@tici").with_command("uptime", "up 3 days");
        assert_eq!(remote.exec("uptime").await.unwrap().stdout, "up 3 days");
        assert_eq!(remote.exec("reboot").await.unwrap().status, Some(127));
        remote.close().await.unwrap();
        assert!(remote.is_closed());
    }
}
