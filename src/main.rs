mod cli;
mod commands;
mod error;
mod format;
mod logging;

use crate::cli::Cli;
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.verbose) {
        eprintln!("{err:?}");
        return ExitCode::from(err.exit_code());
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; stopping after the current step");
                cancel.cancel();
            }
        }
    });

    match commands::run(cli, cancel).await {
        Ok(status) => status.into(),
        Err(err) => {
            tracing::error!(error = ?err, "{err}");
            ExitCode::from(err.exit_code())
        },
    }
}
