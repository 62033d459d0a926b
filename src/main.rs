//! sandkit - cached development sandbox images
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use sandkit::cli::{commands, Cli, Commands};
use sandkit::config::ConfigManager;
use sandkit::error::SandkitResult;
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

async fn run() -> SandkitResult<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load().await?;

    // 0 = warn (progress output only), 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("sandkit=warn"),
        1 => EnvFilter::new("sandkit=info"),
        _ => EnvFilter::new("sandkit=debug"),
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
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
    debug!("Loaded configuration from {}", manager.path().display());

    ConfigManager::ensure_state_dirs().await?;

    match cli.command {
        Commands::Build(args) => commands::build(args, &config).await,
        Commands::Plan(args) => commands::plan(args).await,
        Commands::Catalog(args) => commands::catalog(args).await,
        Commands::Cache(args) => commands::cache(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &manager).await,
        Commands::History(args) => commands::history(args).await,
    }
}
