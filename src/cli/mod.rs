//! Command-line interface module.
//!
//! Defines the CLI structure using Clap: commands, arguments, and options.
//!
//! # Commands
//!
//! - `list`: Discover repositories matching a query
//! - `clone`: Discover and clone repositories into a target directory
//! - `pull`: Discover and pull repositories already present in a target
//! - `status`: Scan a directory tree for working-tree status
//! - `init`: Create an example configuration file
//! - `validate`: Validate a configuration file
//!
//! # Example Usage
//!
//! ```bash
//! # List every repository of an organization
//! repofleet list "octo-org/*/*"
//!
//! # List across all configured providers
//! repofleet list "*/*/*" --format json
//!
//! # Clone an organization into ./repos, pulling existing clones
//! repofleet clone "octo-org/*/*" ./repos --update-mode pull
//!
//! # Pull everything previously cloned
//! repofleet pull "octo-org/*/*" ./repos
//!
//! # Status of every repository under a tree
//! repofleet status ./repos --fail-on-dirty
//! ```

use crate::types::UpdateMode;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for listings and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// Machine-readable JSON
    Json,
}

/// RepoFleet - multi-provider bulk Git repository manager.
#[derive(Parser, Debug)]
#[command(
    name = "repofleet",
    author,
    version,
    about = "Multi-provider bulk Git repository manager",
    long_about = "RepoFleet discovers repositories across Azure DevOps, GitHub and BitBucket \
                  with a single org/project/repo glob query, clones or pulls them in bounded \
                  concurrent batches, and reports working-tree status across directory trees.",
    after_help = "For more information, visit: https://github.com/repofleet/repofleet"
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "REPOFLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover repositories matching a query
    #[command(visible_alias = "ls")]
    List(ListArgs),

    /// Discover and clone repositories into a target directory
    Clone(CloneArgs),

    /// Discover and pull repositories already present in a target
    Pull(PullArgs),

    /// Scan a directory tree for repository status
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Create an example configuration file
    Init,

    /// Validate a configuration file
    Validate(ValidateArgs),
}

/// Arguments for the list command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Query pattern: org/project/repo with * and ? wildcards
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Provider configuration to query (default: configured default)
    #[arg(short, long, value_name = "NAME")]
    pub provider: Option<String>,

    /// Stop after this many repositories
    #[arg(short, long, value_name = "N")]
    pub limit: Option<usize>,

    /// Output format
    #[arg(short, long, default_value = "table", value_enum)]
    pub format: OutputFormat,
}

/// Arguments for the clone command.
#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Query pattern: org/project/repo with * and ? wildcards
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Directory the host/org/project/repo layout is created under
    #[arg(value_name = "TARGET")]
    pub target: PathBuf,

    /// Provider configuration to query (default: configured default)
    #[arg(short, long, value_name = "NAME")]
    pub provider: Option<String>,

    /// Policy for repositories whose directory already exists
    #[arg(short, long, default_value = "skip", value_enum)]
    pub update_mode: UpdateMode,

    /// In-flight limit for git operations
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Stop discovery after this many repositories
    #[arg(short, long, value_name = "N")]
    pub limit: Option<usize>,

    /// Confirm all force-mode removals without prompting
    #[arg(long)]
    pub force_yes: bool,
}

/// Arguments for the pull command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Query pattern: org/project/repo with * and ? wildcards
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Directory holding the host/org/project/repo layout
    #[arg(value_name = "TARGET")]
    pub target: PathBuf,

    /// Provider configuration to query (default: configured default)
    #[arg(short, long, value_name = "NAME")]
    pub provider: Option<String>,

    /// In-flight limit for git operations
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Stop discovery after this many repositories
    #[arg(short, long, value_name = "N")]
    pub limit: Option<usize>,
}

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Root directory to scan
    #[arg(value_name = "PATH", default_value = ".")]
    pub path: PathBuf,

    /// In-flight limit for git status calls
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Run `git fetch` before each status (non-fatal on failure)
    #[arg(long)]
    pub fetch: bool,

    /// Show clean repositories in the table as well
    #[arg(long)]
    pub show_clean: bool,

    /// Exit non-zero when any repository is dirty
    #[arg(long)]
    pub fail_on_dirty: bool,

    /// Output format
    #[arg(short, long, default_value = "table", value_enum)]
    pub format: OutputFormat,
}

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(value_name = "FILE", default_value = "repofleet.yaml")]
    pub config: PathBuf,
}
