//! Remote access through the system `ssh` client.
//!
//! One master connection per device is opened with `ControlMaster=yes` and
//! every later command, fetch and bulk transfer rides on it through the
//! control socket, so the handshake is paid once.

use crate::error::{ErrorKind, Result};
use crate::{CommandOutput, EntryKind, EntryStream, RemoteAccess, RemoteEntry, Transport, part_path, quote};
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// ssh reserves exit status 255 for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

/// Markers in ssh diagnostics that mean credentials or host keys were rejected.
const AUTH_FAILURES: [&str; 4] = [
    "Permission denied",
    "Too many authentication failures",
    "Host key verification failed",
    "no mutual signature algorithm",
];

/// Who to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: Option<u16>,
    /// Private key to authenticate with; `None` defers to the ssh agent/config.
    pub identity_file: Option<PathBuf>,
}
impl SshTarget {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// How to drive the `ssh` client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub program: PathBuf,
    pub multiplex: bool,
    pub control_dir: PathBuf,
    pub connect_timeout: Duration,
    pub control_persist: Duration,
}
impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            multiplex: true,
            control_dir: std::env::temp_dir().join("rlogsync-ssh"),
            connect_timeout: Duration::from_secs(30),
            control_persist: Duration::from_secs(300),
        }
    }
}

/// A session with one device over the system `ssh` client.
#[derive(Debug)]
pub struct SshSession {
    target: SshTarget,
    options: SshOptions,
    destination: String,
    control_path: Option<PathBuf>,
    closed: AtomicBool,
}

impl SshSession {
    /// Authenticate with the device and, when multiplexing, leave a
    /// background master connection running.
    #[tracing::instrument(skip_all, fields(destination = %target.destination()))]
    pub async fn connect(target: SshTarget, options: SshOptions) -> Result<Self> {
        let control_path = match options.multiplex {
            true => Some(prepare_control_dir(&options.control_dir).await?.join("%C")),
            false => None,
        };
        let session = Self {
            destination: target.destination(),
            target,
            options,
            control_path,
            closed: AtomicBool::new(false),
        };
        match &session.control_path {
            Some(control_path) => session.start_master(control_path).await?,
            None => {
                let output = session.exec("true").await?;
                output.into_stdout("true").or_raise(|| ErrorKind::Connection(session.destination.clone()))?;
            },
        }
        tracing::debug!(multiplex = session.control_path.is_some(), "ssh session established");
        Ok(session)
    }

    /// Options shared by the master and every client invocation.
    fn common_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "BatchMode=yes",
            "StrictHostKeyChecking=accept-new",
            "ServerAliveInterval=30",
            "ServerAliveCountMax=3",
            "TCPKeepAlive=yes",
            "Compression=no",
            "Ciphers=aes128-gcm@openssh.com,aes128-ctr",
        ]
        .into_iter()
        .flat_map(|opt| ["-o".to_string(), opt.to_string()])
        .collect();
        args.extend(["-o".to_string(), format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1))]);
        if let Some(port) = self.target.port {
            args.extend(["-p".to_string(), port.to_string()]);
        }
        if let Some(identity) = &self.target.identity_file {
            args.extend(["-i".to_string(), identity.display().to_string()]);
            args.extend(["-o".to_string(), "IdentitiesOnly=yes".to_string()]);
        }
        args
    }

    /// Options for commands that should reuse the master connection.
    fn client_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        if let Some(control_path) = &self.control_path {
            args.extend(["-o".to_string(), format!("ControlPath={}", control_path.display())]);
            args.extend(["-o".to_string(), "ControlMaster=no".to_string()]);
        }
        args
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.options.program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    fn spawn_error(&self, err: std::io::Error) -> ErrorKind {
        match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::Unavailable(self.options.program.display().to_string()),
            _ => ErrorKind::Io,
        }
    }

    async fn start_master(&self, control_path: &Path) -> Result<()> {
        // With `-f` the master forks after authenticating and keeps its
        // inherited stdio open, so diagnostics go to a log file (`-E`) rather
        // than a pipe that would never reach EOF.
        let log = tempfile::NamedTempFile::new().or_raise(|| ErrorKind::Io)?;
        let mut args = self.common_args();
        args.extend([
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}", self.options.control_persist.as_secs().max(1)),
            "-E".to_string(),
            log.path().display().to_string(),
            "-f".to_string(),
            "-N".to_string(),
            self.destination.clone(),
        ]);
        let status = self
            .command(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if status.success() {
            return Ok(());
        }
        let diagnostics = fs::read_to_string(log.path()).await.unwrap_or_default();
        exn::bail!(classify(&self.destination, &diagnostics));
    }

    async fn run(&self, remote_command: &str) -> Result<Output> {
        let mut args = self.client_args();
        args.extend([self.destination.clone(), remote_command.to_string()]);
        let output = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if output.status.code() == Some(SSH_ERROR_STATUS) {
            exn::bail!(classify(&self.destination, &String::from_utf8_lossy(&output.stderr)));
        }
        Ok(output)
    }
}

async fn prepare_control_dir(dir: &Path) -> Result<PathBuf> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await.or_raise(|| ErrorKind::Io)?;
    Ok(dir.to_path_buf())
}

/// Map ssh's own diagnostics to an error kind.
fn classify(destination: &str, diagnostics: &str) -> ErrorKind {
    let reason = diagnostics.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no diagnostics");
    tracing::debug!(destination, reason, "ssh failed");
    match AUTH_FAILURES.iter().any(|marker| diagnostics.contains(marker)) {
        true => ErrorKind::Authentication(destination.to_string()),
        false => ErrorKind::Connection(destination.to_string()),
    }
}

/// Parse `find -printf '%y\t%s\t%P\0'` output.
fn parse_listing(stdout: &str) -> Result<Vec<RemoteEntry>> {
    stdout
        .split('\0')
        .filter(|record| !record.trim().is_empty())
        .map(|record| {
            let record = record.trim_start_matches('\n');
            let mut fields = record.splitn(3, '\t');
            let (Some(kind), Some(size), Some(path)) = (fields.next(), fields.next(), fields.next()) else {
                exn::bail!(ErrorKind::Protocol(record.to_string()));
            };
            let kind = match kind {
                "f" => EntryKind::File,
                "d" => EntryKind::Dir,
                _ => EntryKind::Other,
            };
            let size = size.parse::<u64>().or_raise(|| ErrorKind::Protocol(record.to_string()))?;
            Ok(RemoteEntry {
                kind,
                path: path.to_string(),
                size,
            })
        })
        .collect()
}

#[async_trait]
impl RemoteAccess for SshSession {
    fn destination(&self) -> &str {
        &self.destination
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let output = self.run(command).await?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn walk<'a>(&'a self, root: &'a str) -> EntryStream<'a> {
        Box::pin(stream! {
            let command = format!("find {} -mindepth 1 -printf '%y\\t%s\\t%P\\0'", quote(root));
            let listing = match self.exec(&command).await {
                Ok(output) if !output.success() && output.stderr.contains("No such file") => {
                    Err(exn::Exn::from(ErrorKind::NotFound(root.to_string())))
                },
                Ok(output) => output.into_stdout(&command).and_then(|stdout| parse_listing(&stdout)),
                Err(e) => Err(e),
            };
            match listing {
                Ok(entries) => for entry in entries { yield Ok(entry) },
                Err(e) => yield Err(e),
            }
        })
    }

    async fn fetch(&self, remote: &str, local: &Path) -> Result<u64> {
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io)?;
        }
        let part = part_path(local);
        let mut args = self.client_args();
        args.extend([self.destination.clone(), format!("cat -- {}", quote(remote))]);
        let mut child = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;
        let mut stdout = child.stdout.take().ok_or_raise(|| ErrorKind::Io)?;

        let copied = async {
            let mut file = fs::File::create(&part).await?;
            let bytes = tokio::io::copy(&mut stdout, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(bytes)
        }
        .await;
        // Close our end so a writer blocked on a failed copy sees EPIPE.
        drop(stdout);
        let output = child.wait_with_output().await.or_raise(|| ErrorKind::Io);

        let result = match (copied, output) {
            (Ok(bytes), Ok(output)) if output.status.success() => Ok(bytes),
            (_, Ok(output)) if output.status.code() == Some(SSH_ERROR_STATUS) => {
                Err(exn::Exn::from(classify(&self.destination, &String::from_utf8_lossy(&output.stderr))))
            },
            (_, Ok(output)) if String::from_utf8_lossy(&output.stderr).contains("No such file") => {
                Err(exn::Exn::from(ErrorKind::NotFound(remote.to_string())))
            },
            (Ok(_), Ok(output)) => Err(exn::Exn::from(ErrorKind::CommandFailed(format!(
                "fetch of {remote} exited with {}",
                output.status
            )))),
            (Err(err), Ok(_)) => Err(err).or_raise(|| ErrorKind::Io),
            (_, Err(err)) => Err(err),
        };
        match result {
            Ok(bytes) => {
                fs::rename(&part, local).await.or_raise(|| ErrorKind::Io)?;
                Ok(bytes)
            },
            Err(err) => {
                let _ = fs::remove_file(&part).await;
                Err(err)
            },
        }
    }

    fn transport(&self) -> Option<Transport> {
        Some(Transport {
            program: self.options.program.clone(),
            args: self.client_args(),
            destination: self.destination.clone(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(control_path) = &self.control_path else {
            return Ok(());
        };
        let args: Vec<OsString> = vec![
            "-o".into(),
            format!("ControlPath={}", control_path.display()).into(),
            "-O".into(),
            "exit".into(),
            self.destination.clone().into(),
        ];
        let output = Command::new(&self.options.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            exn::bail!(ErrorKind::Connection(format!(
                "{} (closing control connection: {})",
                self.destination,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::debug!(destination = %self.destination, "closed ssh control connection");
        Ok(())
    }
}
