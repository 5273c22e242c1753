use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Pull rlog segments off comma devices, compress them and archive them to
/// remote storage.
#[derive(Debug, Parser)]
#[command(name = "rlogsync", version, about)]
pub struct Cli {
    /// Configuration file (toml, yaml or json). Defaults to the platform
    /// config directory.
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// More logging; repeat for even more.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch new logs from every device into the archive, then compress them.
    Sync(SyncArgs),
    /// Compress every uncompressed log in the archive.
    Compress(CompressArgs),
    /// Upload the archive to remote storage.
    Upload(UploadArgs),
    /// Sync, compress and upload.
    Run(RunArgs),
    /// Show how much is in the archive, per device.
    Report,
}

#[derive(Debug, Clone, Default, Args)]
pub struct SyncArgs {
    /// Only sync these devices (by label).
    #[arg(short, long = "device", value_name = "LABEL")]
    pub devices: Vec<String>,
    /// Leave newly fetched logs uncompressed.
    #[arg(long)]
    pub no_compress: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct CompressArgs {
    /// Codec to compress with. Without a value, the best one available on
    /// this host.
    #[arg(long, value_name = "CODEC", num_args = 0..=1)]
    pub codec: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct UploadArgs {
    /// List what would be uploaded without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub sync: SyncArgs,
    #[command(flatten)]
    pub upload: UploadArgs,
}
