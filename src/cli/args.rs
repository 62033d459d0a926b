//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sandkit - cached development sandbox images
///
/// Resolves declarative image specs into provisioning steps, runs them in a
/// build container against persistent keyed caches, and commits the result.
#[derive(Parser, Debug)]
#[command(name = "sandkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SANDKIT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build one or more sandbox images
    Build(BuildArgs),

    /// Show the steps a spec resolves to, without building
    Plan(PlanArgs),

    /// List the tools in the built-in catalog
    Catalog(CatalogArgs),

    /// Inspect and clear the cache store
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Show the last build of each image
    History(HistoryArgs),
}

#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Built-in spec names or paths to spec files
    #[arg(required = true)]
    pub specs: Vec<String>,

    /// Keep the build container when a build fails
    #[arg(long)]
    pub keep_failed: bool,

    /// Output format for the final results
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Built-in spec name or path to a spec file
    #[arg(required_unless_present = "list")]
    pub spec: Option<String>,

    /// List the built-in specs
    #[arg(long, conflicts_with = "spec")]
    pub list: bool,

    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct CatalogArgs {
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache entries with their state and size
    List {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Print the cache root, or the directory of one key
    Path {
        /// Cache key
        key: Option<String>,
    },

    /// Remove cache entries
    #[command(group(clap::ArgGroup::new("target").required(true).args(["key", "all"])))]
    Clear {
        /// Cache key to remove
        key: Option<String>,

        /// Remove every entry
        #[arg(long)]
        all: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Show the full record of one image
    pub image: Option<String>,

    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// One name per line
    Plain,
}
