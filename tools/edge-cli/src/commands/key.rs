//! Cache key commands.

use anyhow::{anyhow, Context as _, Result};
use edge_cache::{derive_key, ParsedCacheKey};
use edge_core::{ConfigResolver, GatewayRequest, KeyStrategy, Method, StaticResolver};
use serde_json::{json, Value};

use super::{KeyArgs, KeyCommand};
use crate::context::Context;

/// Run the key command.
pub async fn run(args: KeyArgs, ctx: &Context) -> Result<()> {
    match args.command {
        KeyCommand::Derive {
            path,
            strategy,
            version,
            params,
            headers,
            key_params,
            key_headers,
        } => {
            let derived = DeriveInput {
                path,
                strategy,
                version,
                params,
                headers,
                key_params,
                key_headers,
            };
            derive(derived, ctx)
        }
        KeyCommand::Parse { key } => parse(&key, ctx),
    }
}

struct DeriveInput {
    path: String,
    strategy: Option<String>,
    version: Option<u32>,
    params: Vec<String>,
    headers: Vec<String>,
    key_params: Vec<String>,
    key_headers: Vec<String>,
}

fn split_pair(raw: &str) -> Result<(String, String)> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| anyhow!("Expected name=value, got '{}'", raw))
}

fn derive(input: DeriveInput, ctx: &Context) -> Result<()> {
    let mut request = GatewayRequest::new(Method::Get, &input.path);
    for header in &input.headers {
        let (name, value) = split_pair(header)?;
        request.headers.insert(name, value);
    }
    let mut params = request.params();
    for param in &input.params {
        let (name, value) = split_pair(param)?;
        params.insert(name, Value::String(value));
    }

    let mut config = StaticResolver::new(ctx.config.clone()).resolve(&request.path);
    if let Some(strategy) = &input.strategy {
        config.strategy = strategy
            .parse::<KeyStrategy>()
            .with_context(|| format!("Invalid strategy '{}'", strategy))?;
    }
    if let Some(version) = input.version {
        config.version = version;
    }
    if !input.key_params.is_empty() {
        config.key_params = Some(input.key_params);
    }
    if !input.key_headers.is_empty() {
        config.key_headers = input.key_headers;
    }

    let key = derive_key(&request.path, &config, &params, &request.headers);

    if ctx.output.is_json() {
        ctx.output.json(&json!({
            "key": key,
            "path": request.path,
            "version": config.version,
            "strategy": config.strategy,
            "enabled": config.enabled,
        }));
        return Ok(());
    }

    println!("{}", key);
    ctx.output.debug(&format!("strategy: {}", config.strategy));
    ctx.output.debug(&format!("version: {}", config.version));
    if !config.enabled {
        ctx.output
            .warn(&format!("Caching is disabled for {}", request.path));
    }
    Ok(())
}

fn parse(key: &str, ctx: &Context) -> Result<()> {
    let parsed = ParsedCacheKey::parse(key)?;

    if ctx.output.is_json() {
        ctx.output.json(&parsed);
        return Ok(());
    }

    ctx.output.kv("version", &parsed.version.to_string());
    ctx.output.kv("path", &parsed.path);
    ctx.output.kv("hash", &parsed.hash);
    Ok(())
}
