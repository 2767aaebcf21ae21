//! Hangar - resource cache and container lifecycle for CI
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use hangar::cli::{Cli, Commands};
use hangar::config::{Config, ConfigManager};
use hangar::error::HangarResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> HangarResult<()> {
    let cli = Cli::parse();

    // Config first: it decides the log format
    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);
    debug!("Loaded config from {}", config_manager.path().display());

    ConfigManager::ensure_state_dirs(&config).await?;

    match cli.command {
        Commands::Gc(args) => hangar::cli::commands::gc(args, &config).await,
        Commands::Containers(args) => hangar::cli::commands::containers(args, &config).await,
        Commands::Volumes(args) => hangar::cli::commands::volumes(args, &config).await,
        Commands::Reap(args) => hangar::cli::commands::reap(args, &config).await,
        Commands::Pipeline(args) => hangar::cli::commands::pipeline(args, &config).await,
        Commands::Check(args) => hangar::cli::commands::check(args, &config).await,
        Commands::Config(args) => hangar::cli::commands::config(args, &config, cli.config).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug
fn init_logging(verbose: u8, config: &Config) {
    let filter = match verbose {
        0 => EnvFilter::new("hangar=warn"),
        1 => EnvFilter::new("hangar=info"),
        _ => EnvFilter::new("hangar=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }
}
