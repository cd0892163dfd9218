mod cli;
mod commands;
mod config;
mod error;
mod logging;

use std::io;
use std::process::ExitCode;

use clap::Parser;
use dbtree_core::registry::global;
use dbtree_core::FileStore;

use crate::cli::Cli;
use crate::config::BrowserConfig;
use crate::error::Result;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "dbtree failed");
            eprintln!("dbtree: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = BrowserConfig::from_sources(cli.config.as_deref())?;
    logging::init_logging(&config)?;
    tracing::debug!(registry = %config.registry_path.display(), "opening registry");

    let registry = global::init(FileStore::new(&config.registry_path))?;
    let stdout = io::stdout();
    let outcome = commands::run(registry, &cli.command, &mut stdout.lock());

    // Mutations already persisted on success; this covers ids allocated
    // during load and saves that failed earlier.
    if let Err(err) = global::shutdown() {
        tracing::warn!(error = %err, "registry could not be saved on exit");
        outcome?;
        return Err(err.into());
    }
    outcome?;
    if cli.command.is_mutating() {
        tracing::info!(registry = %registry.location().display(), "registry updated");
    }
    Ok(())
}
