//! CLI command implementations.

pub mod cache;
pub mod config;
pub mod key;

use clap::{Args, Subcommand};

/// Arguments for the key command.
#[derive(Args)]
pub struct KeyArgs {
    #[command(subcommand)]
    pub command: KeyCommand,
}

#[derive(Subcommand)]
pub enum KeyCommand {
    /// Derive the cache key for a request.
    ///
    /// Settings not given on the command line come from the resolved
    /// gateway config for the path.
    Derive {
        /// Request path, optionally with a query string.
        path: String,

        /// Key strategy (path-only, path-params, path-headers, path-params-headers).
        #[arg(short, long)]
        strategy: Option<String>,

        /// Cache version.
        #[arg(long)]
        version: Option<u32>,

        /// Request parameter as name=value (repeatable).
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Request header as name=value (repeatable).
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Parameter included in the key (repeatable).
        #[arg(long = "key-param")]
        key_params: Vec<String>,

        /// Header included in the key (repeatable).
        #[arg(long = "key-header")]
        key_headers: Vec<String>,
    },
    /// Split a cache key into version, path and hash.
    Parse {
        /// Cache key.
        key: String,
    },
}

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration.
    Show {
        /// Show the resolved cache config for this path instead.
        #[arg(long)]
        path: Option<String>,

        /// Print the effective configuration as TOML.
        #[arg(long, conflicts_with = "path")]
        toml: bool,
    },
    /// Validate a config file.
    Validate {
        /// File to validate (default: the loaded config file).
        #[arg(short, long)]
        file: Option<String>,
    },
}

/// Arguments for the invalidate command.
#[derive(Args)]
pub struct InvalidateArgs {
    /// Path glob (`*` wildcard) or a full cache key.
    pub pattern: String,

    /// Skip confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the preview command.
#[derive(Args)]
pub struct PreviewArgs {
    /// Path to preview.
    #[arg(required_unless_present = "key")]
    pub path: Option<String>,

    /// Preview a single cache key instead.
    #[arg(short, long, conflicts_with = "path")]
    pub key: Option<String>,

    /// Cache version (default: resolved by the gateway).
    #[arg(long)]
    pub version: Option<u32>,

    /// Include the stored body.
    #[arg(long)]
    pub content: bool,
}

/// Arguments for the warm command.
#[derive(Args)]
pub struct WarmArgs {
    /// Paths to warm.
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Cache version to warm.
    #[arg(long)]
    pub version: Option<u32>,
}

/// Arguments for the delete command.
#[derive(Args)]
pub struct DeleteArgs {
    /// Cache key to delete.
    pub key: String,

    /// Skip confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}
