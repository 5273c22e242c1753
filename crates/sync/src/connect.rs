//! Opening sessions with configured devices.

use async_trait::async_trait;
use rlogsync_config::{Device, SshSettings};
use rlogsync_remote::error::Result as RemoteResult;
use rlogsync_remote::{RemoteHandle, SshOptions, SshSession, SshTarget};

/// Opens an authenticated session with a device.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, device: &Device) -> RemoteResult<RemoteHandle>;
}

/// Connects through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

impl From<&SshSettings> for SshConnector {
    fn from(settings: &SshSettings) -> Self {
        let defaults = SshOptions::default();
        Self::new(SshOptions {
            program: settings.program.clone(),
            multiplex: settings.multiplex,
            control_dir: settings.control_dir.clone().unwrap_or(defaults.control_dir),
            connect_timeout: settings.connect_timeout(),
            control_persist: settings.control_persist(),
        })
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, device: &Device) -> RemoteResult<RemoteHandle> {
        let target = SshTarget {
            host: device.hostname.clone(),
            user: device.username.clone(),
            port: device.port,
            identity_file: device.identity_file.clone(),
        };
        let session = SshSession::connect(target, self.options.clone()).await?;
        Ok(Box::new(session))
    }
}
