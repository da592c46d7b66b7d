//! CLI execution context.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use edge_core::GatewayConfig;

use crate::client::AdminClient;
use crate::output::Output;

const DEFAULT_GATEWAY: &str = "http://127.0.0.1:3000";

/// Execution context for CLI commands.
pub struct Context {
    /// Gateway configuration (defaults when no file was found).
    pub config: GatewayConfig,
    /// File the configuration came from.
    pub config_path: Option<PathBuf>,
    /// Gateway base URL.
    pub gateway_url: String,
    /// Output handler.
    pub output: Output,
}

impl Context {
    /// Load context from an explicit config file or the nearest one found.
    pub fn load(config_path: Option<&str>, gateway: Option<String>, output: Output) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;

        let config_path = match config_path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::find_config(&cwd),
        };
        let config = match &config_path {
            Some(path) => GatewayConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => GatewayConfig::default(),
        };

        let gateway_url = gateway
            .or_else(|| std::env::var("EDGE_GATEWAY").ok())
            .unwrap_or_else(|| DEFAULT_GATEWAY.to_string());

        Ok(Self {
            config,
            config_path,
            gateway_url,
            output,
        })
    }

    /// Find a config file in the directory tree.
    fn find_config(start: &Path) -> Option<PathBuf> {
        let config_names = ["gateway.toml", "edge.toml", "gateway.json"];

        let mut current = start.to_path_buf();
        loop {
            for name in &config_names {
                let candidate = current.join(name);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Client for the gateway's admin surface.
    pub fn admin(&self) -> Result<AdminClient> {
        AdminClient::new(&self.gateway_url, &self.config.admin.prefix)
    }
}
