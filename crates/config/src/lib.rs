//! Run configuration.
//!
//! Loaded once at start-up by [`Config::load`] and then only ever borrowed:
//! defaults, then a TOML/YAML/JSON file, then `RLOGSYNC_` environment
//! variables (`__` separates nested keys, e.g. `RLOGSYNC_SYNC__TRANSFER=per-file`).

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use rlogsync_compress::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "RLOGSYNC_";
/// Largest total size of one remote archive folder: 1.9 GiB.
pub const DEFAULT_MAX_FOLDER_SIZE_BYTES: u64 = 2_040_109_465;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub devices: Vec<Device>,
    pub sync: SyncSettings,
    pub compression: CompressionSettings,
    pub upload: UploadSettings,
}

/// One device to pull logs from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub hostname: String,
    /// Human name, also the top-level folder of the device in the archive.
    pub label: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// Private key used to authenticate; `None` defers to the ssh agent.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

fn default_username() -> String {
    "comma".to_string()
}

/// How bytes move from a device into the staging area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMethod {
    /// One rsync run over the whole needed set.
    #[default]
    Bulk,
    /// One fetch per file through the ssh session.
    PerFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Directory on the device that holds the route folders.
    pub remote_root: String,
    /// Only remote files whose name contains this are synced.
    pub marker: String,
    pub archive_dir: PathBuf,
    pub transfer: TransferMethod,
    /// Pause between two devices.
    pub cooldown_secs: u64,
    /// Concurrent fetches for the per-file strategy.
    pub max_in_flight: usize,
    /// Skip devices that are currently driving.
    pub require_offroad: bool,
    pub dongle_id_path: String,
    pub offroad_path: String,
    pub naming: NamingSettings,
    pub rsync: RsyncSettings,
    pub ssh: SshSettings,
}
impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_root: "/data/media/0/realdata".to_string(),
            marker: "rlog".to_string(),
            archive_dir: PathBuf::from("./rlogs"),
            transfer: TransferMethod::default(),
            cooldown_secs: 5,
            max_in_flight: 4,
            require_offroad: true,
            dongle_id_path: "/data/params/d/DongleId".to_string(),
            offroad_path: "/data/params/d/IsOffroad".to_string(),
            naming: NamingSettings::default(),
            rsync: RsyncSettings::default(),
            ssh: SshSettings::default(),
        }
    }
}
impl SyncSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingSettings {
    /// Use `_` instead of `|` between route segments.
    pub portable: bool,
    /// Longest canonical name, in bytes.
    pub max_length: usize,
}
impl Default for NamingSettings {
    fn default() -> Self {
        Self {
            portable: false,
            max_length: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsyncSettings {
    pub program: PathBuf,
    /// `0` disables transport compression.
    pub compress_level: u8,
    /// `0` means unlimited.
    pub bandwidth_limit_kbps: u32,
    pub whole_file: bool,
}
impl Default for RsyncSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("rsync"),
            compress_level: 1,
            bandwidth_limit_kbps: 0,
            whole_file: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub program: PathBuf,
    pub multiplex: bool,
    /// Where control sockets live; defaults to a temp directory.
    pub control_dir: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub control_persist_secs: u64,
}
impl Default for SshSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            multiplex: true,
            control_dir: None,
            connect_timeout_secs: 30,
            control_persist_secs: 300,
        }
    }
}
impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn control_persist(&self) -> Duration {
        Duration::from_secs(self.control_persist_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub enabled: bool,
    /// `None` picks the best codec available on this host.
    pub codec: Option<Compression>,
    /// External `zstd` used when the built-in encoder is compiled out.
    pub zstd_program: PathBuf,
}
impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            codec: None,
            zstd_program: PathBuf::from("zstd"),
        }
    }
}

/// Where the archive is uploaded to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UploadBackend {
    Rclone {
        #[serde(default = "default_rclone_remote")]
        remote: String,
        #[serde(default = "default_rclone_folder")]
        folder: String,
        #[serde(default = "default_rclone_program")]
        program: PathBuf,
    },
    Local {
        path: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: String,
    },
}
impl Default for UploadBackend {
    fn default() -> Self {
        Self::Rclone {
            remote: default_rclone_remote(),
            folder: default_rclone_folder(),
            program: default_rclone_program(),
        }
    }
}

fn default_rclone_remote() -> String {
    "gdrive".to_string()
}

fn default_rclone_folder() -> String {
    "rlogs".to_string()
}

fn default_rclone_program() -> PathBuf {
    PathBuf::from("rclone")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub backend: UploadBackend,
    pub max_folder_size_bytes: u64,
    pub transfers: usize,
    pub checkers: usize,
    pub retries: u32,
    pub low_level_retries: u32,
    pub tps_limit: u32,
}
impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            backend: UploadBackend::default(),
            max_folder_size_bytes: DEFAULT_MAX_FOLDER_SIZE_BYTES,
            transfers: 16,
            checkers: 16,
            retries: 3,
            low_level_retries: 10,
            tps_limit: 100,
        }
    }
}

impl Config {
    /// Default configuration file location for this platform.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "rlogsync").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate the configuration.
    ///
    /// An explicit `path` must exist. Without one, the platform default is
    /// used when present; otherwise only defaults and the environment apply.
    /// Devices are not required here, only by [`select_devices`](Self::select_devices).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|p| p.is_file()),
        };
        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "loading configuration file");
            figment = merge_file(figment, &file)?;
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut labels = HashSet::new();
        for device in &self.devices {
            if device.hostname.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid(format!("device `{}` has no hostname", device.label)));
            }
            if device.label.is_empty() || device.label.contains(['/', '\\']) || device.label == ".." {
                exn::bail!(ErrorKind::Invalid(format!("device label `{}` is not a folder name", device.label)));
            }
            if !labels.insert(device.label.as_str()) {
                exn::bail!(ErrorKind::Invalid(format!("duplicate device label `{}`", device.label)));
            }
        }
        if self.sync.marker.is_empty() {
            exn::bail!(ErrorKind::Invalid("sync.marker must not be empty".to_string()));
        }
        if self.upload.max_folder_size_bytes == 0 {
            exn::bail!(ErrorKind::Invalid("upload.max_folder_size_bytes must be positive".to_string()));
        }
        if let Some(codec) = self.compression.codec
            && codec != Compression::None
            && !codec.is_archival()
        {
            exn::bail!(ErrorKind::Invalid(format!("compression.codec `{codec}` is not gzip or zstd")));
        }
        Ok(())
    }

    /// Look a device up by label.
    pub fn device(&self, label: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.label == label)
    }

    /// Restrict to the named devices, in configuration order. Fails when no
    /// devices are configured at all.
    pub fn select_devices(&self, labels: &[String]) -> Result<Vec<&Device>> {
        if self.devices.is_empty() {
            exn::bail!(ErrorKind::NoDevices);
        }
        if labels.is_empty() {
            return Ok(self.devices.iter().collect());
        }
        for label in labels {
            self.device(label)
                .ok_or_raise(|| ErrorKind::Invalid(format!("unknown device `{label}`")))?;
        }
        Ok(self.devices.iter().filter(|d| labels.contains(&d.label)).collect())
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}
