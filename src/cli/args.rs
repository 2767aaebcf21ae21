//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Hangar - resource cache and container lifecycle for CI
///
/// Checks pipeline resources for new versions and collects the caches,
/// containers and volumes nothing uses anymore.
#[derive(Parser, Debug)]
#[command(name = "hangar")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "HANGAR_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one garbage collection pass over uses, caches and configs
    Gc(GcArgs),

    /// List containers eligible for deletion
    Containers(ListArgs),

    /// List volumes eligible for deletion
    Volumes(ListArgs),

    /// Destroy eligible containers and volumes
    Reap(ReapArgs),

    /// Manage pipelines
    Pipeline(PipelineArgs),

    /// Check a resource or resource type for new versions now
    Check(CheckArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the gc command
#[derive(Parser, Debug)]
pub struct GcArgs {
    /// Output format for the summary
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the containers and volumes commands
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the reap command
#[derive(Parser, Debug)]
pub struct ReapArgs {
    /// Also run garbage collection first, so freshly unused caches are reaped
    #[arg(long)]
    pub gc: bool,
}

/// Arguments for the pipeline command
#[derive(Parser, Debug)]
pub struct PipelineArgs {
    /// Subcommand for pipeline
    #[command(subcommand)]
    pub action: PipelineAction,
}

/// Pipeline subcommands
#[derive(Subcommand, Debug)]
pub enum PipelineAction {
    /// Create or update a pipeline from a TOML definition
    Set {
        /// Pipeline name
        name: String,
        /// Definition file
        file: PathBuf,
    },

    /// Pause a pipeline; its resources stop being checked
    Pause {
        /// Pipeline name
        name: String,
    },

    /// Resume a paused pipeline
    Unpause {
        /// Pipeline name
        name: String,
    },

    /// List pipelines
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

/// Arguments for the check command
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Pipeline name
    pub pipeline: String,

    /// Resource name (or resource type name with --resource-type)
    pub name: String,

    /// Check a pipeline-defined resource type instead of a resource
    #[arg(long)]
    pub resource_type: bool,

    /// Check from this version instead of the latest (KEY=VALUE, repeatable)
    #[arg(long = "from", value_name = "KEY=VALUE")]
    pub from: Vec<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., radar.lock_lease_secs)
        key: String,
        /// Value to set
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn check_collects_repeated_from_pairs() {
        let cli = Cli::parse_from([
            "hangar", "check", "main", "repo", "--from", "ref=abc", "--from", "branch=main",
        ]);
        match cli.command {
            Commands::Check(args) => {
                assert_eq!(args.pipeline, "main");
                assert_eq!(args.name, "repo");
                assert!(!args.resource_type);
                assert_eq!(args.from, vec!["ref=abc", "branch=main"]);
            }
            other => panic!("expected check, got {other:?}"),
        }
    }

    #[test]
    fn verbose_counts() {
        let cli = Cli::parse_from(["hangar", "-vv", "gc"]);
        assert_eq!(cli.verbose, 2);
    }
}
