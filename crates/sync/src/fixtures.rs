//! Shared test fixtures: a parked device with a few routes.

use crate::connect::Connector;
use async_trait::async_trait;
use rlogsync_config::{Config, Device};
use rlogsync_remote::error::{ErrorKind as RemoteErrorKind, Result as RemoteResult};
use rlogsync_remote::{MockRemote, RemoteHandle};
use std::path::{Path, PathBuf};

pub(crate) const ROOT: &str = "/data/media/0/realdata";

pub(crate) fn device(label: &str) -> Device {
    Device {
        hostname: format!("{label}.local"),
        label: label.to_string(),
        username: "comma".to_string(),
        port: None,
        identity_file: None,
    }
}

pub(crate) fn config(archive: &Path) -> Config {
    let mut config = Config {
        devices: vec![device("tici")],
        ..Config::default()
    };
    config.sync.archive_dir = archive.to_path_buf();
    config.sync.cooldown_secs = 0;
    config
}

pub(crate) fn mock_device(dongle: &str) -> MockRemote {
    MockRemote::new("comma@tici.local")
        .with_file("/data/params/d/DongleId", format!("{dongle}\n"))
        .with_file("/data/params/d/IsOffroad", "1")
        .with_file(format!("{ROOT}/a/b/rlog"), "one")
        .with_file(format!("{ROOT}/a/b/rlog.bz2"), "two")
        .with_file(format!("{ROOT}/a/b/qlog"), "not synced")
        .with_file(format!("{ROOT}/c/rlog"), "three")
}

/// Every connection attempt is refused.
pub(crate) struct FailingConnector;

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, device: &Device) -> RemoteResult<RemoteHandle> {
        exn::bail!(RemoteErrorKind::Authentication(device.hostname.clone()))
    }
}

/// Every device is a fresh [`mock_device`] with this dongle id.
pub(crate) struct MockConnector(pub &'static str);

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _device: &Device) -> RemoteResult<RemoteHandle> {
        Ok(Box::new(mock_device(self.0)))
    }
}

/// Stand-in for rsync: creates every file the filter includes, except those
/// containing `skip`, then exits with `status`.
#[cfg(unix)]
pub(crate) fn stub_rsync(dir: &Path, skip: &str, status: i32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("rsync");
    let script = format!(
        r#"#!/bin/sh
filter=""
for arg in "$@"; do
    case "$arg" in
        --filter=merge\ *) filter="${{arg#--filter=merge }}" ;;
    esac
    dest="$arg"
done
grep '^+ .*[^/]$' "$filter" | sed 's/^+ \///' | grep -v '{skip}' | while IFS= read -r path; do
    mkdir -p "$dest/$(dirname "$path")"
    printf data > "$dest/$path"
done
exit {status}
"#
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
