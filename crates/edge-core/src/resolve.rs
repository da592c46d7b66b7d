//! Three-tier cache config resolution and upstream routing.
//!
//! Precedence is path override > route default > global default, applied
//! field by field. Routes are matched by longest prefix.

use crate::config::{CacheOverrides, GatewayConfig, ResolvedCacheConfig, RouteConfig};

/// Produces the effective cache configuration for a path.
pub trait ConfigResolver: Send + Sync {
    /// Resolve the effective cache config for `path`.
    fn resolve(&self, path: &str) -> ResolvedCacheConfig;
}

/// Whether `path` lives under `prefix` on a segment boundary.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn longest_route<'a>(routes: &'a [RouteConfig], path: &str) -> Option<&'a RouteConfig> {
    routes
        .iter()
        .filter(|route| prefix_matches(&route.prefix, path))
        .max_by_key(|route| route.prefix.trim_end_matches('/').len())
}

fn apply(resolved: &mut ResolvedCacheConfig, tier: &CacheOverrides) {
    if let Some(enabled) = tier.enabled {
        resolved.enabled = enabled;
    }
    if let Some(version) = tier.version {
        resolved.version = version;
    }
    if let Some(ttl) = tier.ttl {
        resolved.ttl = Some(ttl);
    }
    if let Some(strategy) = tier.strategy {
        resolved.strategy = strategy;
    }
    if let Some(headers) = &tier.key_headers {
        resolved.key_headers = headers.clone();
    }
    if let Some(params) = &tier.key_params {
        resolved.key_params = Some(params.clone());
    }
}

/// Resolver backed by a loaded [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct StaticResolver {
    config: GatewayConfig,
}

impl StaticResolver {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

impl ConfigResolver for StaticResolver {
    fn resolve(&self, path: &str) -> ResolvedCacheConfig {
        let mut resolved = ResolvedCacheConfig {
            version: self.config.cache.version,
            ..ResolvedCacheConfig::default()
        };
        apply(&mut resolved, &self.config.global);
        if let Some(route) = longest_route(&self.config.routes, path) {
            apply(&mut resolved, &route.cache);
        }
        if let Some(overrides) = self.config.paths.get(path) {
            apply(&mut resolved, overrides);
        }
        resolved
    }
}

/// Where a request should be forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// Upstream host name; the circuit breaker key.
    pub host: String,
    /// Absolute URL to fetch.
    pub url: String,
}

/// Longest-prefix table of upstream routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteConfig>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        Self { routes }
    }

    /// Build from the routes of a gateway config.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.routes.clone())
    }

    /// Whether no routes are configured.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve `path_and_query` to an upstream target.
    ///
    /// Returns `None` when no route matches or the upstream URL has no host.
    pub fn resolve(&self, path_and_query: &str) -> Option<UpstreamTarget> {
        let path = path_and_query
            .split_once('?')
            .map_or(path_and_query, |(path, _)| path);
        let route = longest_route(&self.routes, path)?;
        let uri: http::Uri = route.upstream.parse().ok()?;
        let host = uri.host()?.to_string();

        Some(UpstreamTarget {
            host,
            url: format!("{}{}", route.upstream.trim_end_matches('/'), path_and_query),
        })
    }
}
