//! mempool CLI - GPU memory pool read benchmark

use anyhow::{Result, anyhow};
use clap::Parser;
use mempool_cli::{Cli, Commands, load_config};
use mempool_telemetry::{LogLevel, init_logging};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let level = LogLevel::from_verbosity(config.log.level, cli.verbose);
    init_logging(&config.log.clone().with_level(level))
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    match cli.command {
        Commands::Run { output, print } => {
            mempool_cli::commands::run::execute(&config, output.as_deref(), print)
        }
        Commands::List => mempool_cli::commands::list::execute(&config),
        Commands::Info => mempool_cli::commands::info::execute(&config),
        Commands::Monitor { frames, set } => {
            mempool_cli::commands::monitor::execute(&config, frames, &set)
        }
    }
}
