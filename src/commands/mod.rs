mod compress;
mod report;
mod sync;
mod upload;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use rlogsync_config::Config;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// How a run that did not hit a fatal error ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// At least one device could not be reached or refused our credentials.
    DevicesUnreachable,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => ExitCode::SUCCESS,
            Status::DevicesUnreachable => ExitCode::from(1),
        }
    }
}

pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<Status> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match cli.command {
        Command::Sync(args) => sync::run(&config, &args, &cancel).await,
        Command::Compress(args) => {
            compress::run(&config, args.codec).await?;
            Ok(Status::Success)
        },
        Command::Upload(args) => {
            upload::run(&config, args.dry_run, &cancel).await?;
            Ok(Status::Success)
        },
        Command::Run(args) => {
            let status = sync::run(&config, &args.sync, &cancel).await?;
            if !cancel.is_cancelled() {
                upload::run(&config, args.upload.dry_run, &cancel).await?;
            }
            Ok(status)
        },
        Command::Report => {
            report::run(&config).await?;
            Ok(Status::Success)
        },
    }
}
