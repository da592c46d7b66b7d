//! Configuration commands.

use anyhow::{bail, Context as _, Result};
use edge_core::{ConfigResolver, GatewayConfig, RouteTable, StaticResolver};

use super::{ConfigArgs, ConfigCommand};
use crate::context::Context;

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show { path, toml } => match path {
            Some(path) => show_resolved(&path, ctx),
            None if toml => print_toml(ctx),
            None => show_config(ctx),
        },
        ConfigCommand::Validate { file } => validate_config(file.as_deref(), ctx),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    if ctx.output.is_json() {
        ctx.output.json(&ctx.config);
        return Ok(());
    }

    let config = &ctx.config;
    match &ctx.config_path {
        Some(path) => ctx.output.header(&format!("Configuration ({})", path.display())),
        None => ctx.output.header("Configuration (defaults)"),
    }

    ctx.output.info("[cache]");
    ctx.output.kv("default_ttl", &format!("{}s", config.cache.default_ttl));
    ctx.output.kv("max_ttl", &format!("{}s", config.cache.max_ttl));
    ctx.output.kv("ttl_variance", &config.cache.ttl_variance.to_string());
    ctx.output.kv(
        "compression_threshold",
        &crate::output::format_bytes(config.cache.compression_threshold_bytes as u64),
    );
    ctx.output.kv("version", &config.cache.version.to_string());

    ctx.output.info("[breaker]");
    ctx.output
        .kv("failure_threshold", &config.breaker.failure_threshold.to_string());
    ctx.output.kv("timeout", &format!("{}s", config.breaker.timeout_secs));
    ctx.output.kv("extension", &format!("{}s", config.breaker.extension_secs));

    ctx.output.info("[timeouts]");
    ctx.output.kv("miss", &format!("{}ms", config.timeouts.miss_ms));
    ctx.output.kv("refresh", &format!("{}ms", config.timeouts.refresh_ms));
    ctx.output.kv("warm", &format!("{}ms", config.timeouts.warm_ms));

    ctx.output.info("[admin]");
    ctx.output.kv("enabled", &config.admin.enabled.to_string());
    ctx.output.kv("prefix", &config.admin.prefix);

    if !config.routes.is_empty() {
        ctx.output.info("[[routes]]");
        for route in &config.routes {
            ctx.output
                .list_item(&format!("{} -> {}", route.prefix, route.upstream));
        }
    }
    if !config.paths.is_empty() {
        ctx.output.info("[paths]");
        for path in config.paths.keys() {
            ctx.output.list_item(path);
        }
    }
    Ok(())
}

fn print_toml(ctx: &Context) -> Result<()> {
    let rendered =
        toml::to_string_pretty(&ctx.config).context("Failed to render configuration as TOML")?;
    print!("{}", rendered);
    Ok(())
}

fn show_resolved(path: &str, ctx: &Context) -> Result<()> {
    let resolved = StaticResolver::new(ctx.config.clone()).resolve(path);
    let target = RouteTable::from_config(&ctx.config).resolve(path);

    if ctx.output.is_json() {
        ctx.output.json(&serde_json::json!({
            "path": path,
            "cache": resolved,
            "upstream": target.as_ref().map(|t| &t.url),
        }));
        return Ok(());
    }

    ctx.output.header(path);
    ctx.output.kv("enabled", &resolved.enabled.to_string());
    ctx.output.kv("version", &resolved.version.to_string());
    ctx.output.kv(
        "ttl",
        &resolved
            .ttl
            .map_or_else(|| "default".to_string(), |t| format!("{}s", t)),
    );
    ctx.output.kv("strategy", resolved.strategy.as_str());
    if !resolved.key_headers.is_empty() {
        ctx.output.kv("key_headers", &resolved.key_headers.join(", "));
    }
    if let Some(params) = &resolved.key_params {
        ctx.output.kv("key_params", &params.join(", "));
    }
    match target {
        Some(target) => ctx.output.kv("upstream", &target.url),
        None => ctx.output.warn("No upstream route matches this path"),
    }
    Ok(())
}

fn validate_config(file: Option<&str>, ctx: &Context) -> Result<()> {
    let path = match (file, &ctx.config_path) {
        (Some(file), _) => std::path::PathBuf::from(file),
        (None, Some(path)) => path.clone(),
        (None, None) => bail!("No config file found. Pass --file or --config."),
    };

    let spinner = ctx.output.spinner("Validating configuration...");
    let loaded = GatewayConfig::load(&path);
    spinner.finish_and_clear();
    let config = loaded.with_context(|| format!("Invalid config: {}", path.display()))?;

    if ctx.output.is_json() {
        ctx.output.json(&serde_json::json!({
            "valid": true,
            "file": path.display().to_string(),
            "routes": config.routes.len(),
            "paths": config.paths.len(),
        }));
        return Ok(());
    }

    ctx.output
        .success(&format!("{} is valid", path.display()));
    ctx.output.kv("routes", &config.routes.len().to_string());
    ctx.output.kv("path overrides", &config.paths.len().to_string());
    if !config.admin.enabled {
        ctx.output
            .warn("Admin endpoints are disabled; remote commands will not work");
    }
    Ok(())
}
