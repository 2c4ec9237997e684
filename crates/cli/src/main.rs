use anyhow::Result;
use clap::Parser;
use colored::*;
use std::io;

mod cli_args;
mod commands;

use cli_args::CliArgs;
use picoclaw_utils::telemetry::{setup_telemetry, shutdown_telemetry};

fn main() {
    setup_telemetry(env!("CARGO_BIN_NAME"), env!("CARGO_PKG_VERSION"));
    let args = CliArgs::parse();

    let result = execute(&args);
    shutdown_telemetry();

    if let Err(e) = result {
        eprintln!("{} {:#}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

fn execute(args: &CliArgs) -> Result<()> {
    let config = args.store_config()?;
    log::debug!(
        "picoclaw-db: workspace {} ({})",
        config.workspace.display(),
        config.persistence
    );
    let stdout = io::stdout();
    let mut out = stdout.lock();
    commands::run(&args.command, &config, &mut out)
}
