//! Edge CLI - Operator tool for the edge caching gateway.
//!
//! Commands:
//! - `edge key` - Derive or parse cache keys
//! - `edge config` - Validate or show a gateway config
//! - `edge invalidate` - Soft-expire entries by glob or key
//! - `edge stats` - Show cache statistics
//! - `edge preview` - Inspect stored entries
//! - `edge warm` - Pre-populate paths
//! - `edge delete` - Hard-delete an entry

mod client;
mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use edge_core::{LogFormat, LogSettings};

use commands::{ConfigArgs, DeleteArgs, InvalidateArgs, KeyArgs, PreviewArgs, WarmArgs};

/// Edge CLI - Inspect and manage the edge gateway cache
#[derive(Parser)]
#[command(name = "edge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use JSON output format
    #[arg(long, global = true)]
    json: bool,

    /// Gateway config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Gateway base URL for admin commands (default: $EDGE_GATEWAY or http://127.0.0.1:3000)
    #[arg(short, long, global = true)]
    gateway: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive or parse cache keys
    Key(KeyArgs),

    /// Validate or show the gateway configuration
    Config(ConfigArgs),

    /// Invalidate entries by path glob or cache key
    Invalidate(InvalidateArgs),

    /// Show cache statistics
    Stats,

    /// Preview stored entries for a path or key
    Preview(PreviewArgs),

    /// Warm the cache for a list of paths
    Warm(WarmArgs),

    /// Hard-delete a single entry
    Delete(DeleteArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let output = output::Output::new(cli.verbose, cli.json);
    if cli.verbose {
        edge_observability::init_tracing(&LogSettings {
            level: "debug".to_string(),
            format: LogFormat::Compact,
        });
    }

    let ctx = context::Context::load(cli.config.as_deref(), cli.gateway, output)?;

    let result = match cli.command {
        Commands::Key(args) => commands::key::run(args, &ctx).await,
        Commands::Config(args) => commands::config::run(args, &ctx).await,
        Commands::Invalidate(args) => commands::cache::invalidate(args, &ctx).await,
        Commands::Stats => commands::cache::stats(&ctx).await,
        Commands::Preview(args) => commands::cache::preview(args, &ctx).await,
        Commands::Warm(args) => commands::cache::warm(args, &ctx).await,
        Commands::Delete(args) => commands::cache::delete(args, &ctx).await,
    };

    if let Err(e) = result {
        ctx.output.error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
