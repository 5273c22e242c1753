//! Access to a remote device: run commands, walk directories, fetch files.
//!
//! [`RemoteAccess`] is the seam the sync pipeline talks through. The real
//! implementation, [`SshSession`], drives the system `ssh` client over one
//! multiplexed control connection per device.

pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod quote;
mod ssh;

#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockRemote;
pub use crate::quote::quote;
pub use crate::ssh::{SshOptions, SshSession, SshTarget};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub type EntryStream<'a> = Pin<Box<dyn Stream<Item = Result<RemoteEntry>> + Send + 'a>>;
pub type RemoteHandle = Box<dyn RemoteAccess>;

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status, `None` if the command was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}
impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout of a successful command, or a [`CommandFailed`](ErrorKind::CommandFailed) error.
    pub fn into_stdout(self, command: &str) -> Result<String> {
        if self.success() {
            return Ok(self.stdout);
        }
        exn::bail!(ErrorKind::CommandFailed(format!(
            "`{command}` exited with {}: {}",
            self.status.map_or_else(|| "signal".to_string(), |s| s.to_string()),
            self.stderr.trim()
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// One entry of a recursive remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub kind: EntryKind,
    /// Path relative to the walked root, `/`-separated.
    pub path: String,
    pub size: u64,
}
impl RemoteEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            kind: EntryKind::File,
            path: path.into(),
            size,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Dir,
            path: path.into(),
            size: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// How an external bulk transfer tool reaches the same host through the
/// same (possibly multiplexed) connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    /// Remote shell program, e.g. `ssh`.
    pub program: PathBuf,
    /// Options for the remote shell, excluding the destination.
    pub args: Vec<String>,
    /// `user@host` as understood by the remote shell.
    pub destination: String,
}
impl Transport {
    /// The full remote shell command line, quoted for tools (like rsync's
    /// `--rsh`) that split it shell-style.
    pub fn shell_command(&self) -> String {
        let program = self.program.to_string_lossy();
        crate::quote::join(std::iter::once(&*program).chain(self.args.iter().map(String::as_str)))
    }
}

/// An authenticated session with one remote device.
#[async_trait]
pub trait RemoteAccess: Send + Sync {
    /// `user@host` (for logging).
    fn destination(&self) -> &str;

    /// Run a shell command on the device.
    ///
    /// A command that runs and exits non-zero is *not* an error; inspect
    /// [`CommandOutput::status`]. Errors are reserved for failures of the
    /// session itself.
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Recursively list everything beneath the absolute remote `root`.
    ///
    /// A root that cannot be listed is an error.
    fn walk<'a>(&'a self, root: &'a str) -> EntryStream<'a>;

    /// Copy the remote file `remote` to `local`, returning bytes written.
    ///
    /// Implementations write to a sibling `.part` file first and rename it
    /// into place on success, so `local` never holds a truncated file.
    async fn fetch(&self, remote: &str, local: &Path) -> Result<u64>;

    /// Read a small remote text file.
    async fn read_to_string(&self, remote: &str) -> Result<String> {
        let command = format!("cat -- {}", quote(remote));
        let output = self.exec(&command).await?;
        if !output.success() && output.stderr.contains("No such file") {
            exn::bail!(ErrorKind::NotFound(remote.to_string()));
        }
        output.into_stdout(&command)
    }

    /// Connection details for an external bulk transfer tool, if the session
    /// can share its channel with one.
    fn transport(&self) -> Option<Transport> {
        None
    }

    /// Tear the session down. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Temporary sibling used while a fetch is in flight.
pub fn part_path(local: &Path) -> PathBuf {
    let mut name = local.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_output_success() {
        let output = CommandOutput {
            status: Some(0),
            stdout: "abc123\n".into(),
            stderr: String::new(),
        };
        assert_eq!(output.into_stdout("cat x").unwrap(), "abc123\n");
    }

    #[test]
    fn command_output_failure() {
        let output = CommandOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: "cat: x: No such file or directory\n".into(),
        };
        let err = output.into_stdout("cat x").unwrap_err();
        assert!(matches!(&*err, ErrorKind::CommandFailed(msg) if msg.contains("exited with 1")));
    }

    #[test]
    fn entry_name() {
        assert_eq!(RemoteEntry::file("2024-01-01--12-00-00/0/rlog", 1).name(), "rlog");
        assert_eq!(RemoteEntry::file("rlog", 1).name(), "rlog");
    }

    #[test]
    fn transport_shell_command() {
        let transport = Transport {
            program: PathBuf::from("ssh"),
            args: vec!["-o".into(), "ControlPath=/tmp/rlog sync/%C".into(), "-p".into(), "8022".into()],
            destination: "comma@tici".into(),
        };
        assert_eq!(transport.shell_command(), "ssh -o 'ControlPath=/tmp/rlog sync/%C' -p 8022");
    }

    #[test]
    fn part_path_appends() {
        assert_eq!(part_path(Path::new("/s/a/rlog")), PathBuf::from("/s/a/rlog.part"));
    }
}
