use std::process::ExitCode;

use ckpt_loader::{ErrorCategory, LoadError};
use clap::Parser;
use tracing::Level;

mod cli;
mod commands;

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<LoadError>().map(LoadError::category) {
        Some(ErrorCategory::NotACheckpoint) => 2,
        Some(ErrorCategory::Corrupt) => 3,
        Some(ErrorCategory::Unsupported) => 4,
        Some(ErrorCategory::Io) | None => 1,
    }
}

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    match commands::run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
