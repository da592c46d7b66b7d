//! Gateway configuration.
//!
//! A single document (TOML on disk, JSON when stored in the KV store) carries
//! the cache, breaker and timeout tunables plus the three configuration tiers
//! consumed by the resolver: global defaults, per-route defaults and per-path
//! overrides.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_TTL_SECS: u64 = 300;
const MAX_TTL_SECS: u64 = 86_400;
const DEFAULT_TTL_VARIANCE: f64 = 0.1;
const COMPRESSION_THRESHOLD_BYTES: usize = 10 * 1024;
const INDEX_CAP_PER_PATH: usize = 1000;
const EMPTY_RESPONSE_TTL_SECS: u64 = 30;
const UPDATE_LOCK_TTL_SECS: u64 = 300;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How a cache key is derived from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStrategy {
    /// Path and cache version only.
    PathOnly,
    /// Path plus query (or JSON body) parameters.
    #[default]
    PathParams,
    /// Path plus selected request headers.
    PathHeaders,
    /// Path plus parameters and selected headers.
    PathParamsHeaders,
}

impl KeyStrategy {
    /// Tag used in configuration and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathOnly => "path-only",
            Self::PathParams => "path-params",
            Self::PathHeaders => "path-headers",
            Self::PathParamsHeaders => "path-params-headers",
        }
    }

    /// Whether request parameters take part in the key.
    pub fn uses_params(&self) -> bool {
        matches!(self, Self::PathParams | Self::PathParamsHeaders)
    }

    /// Whether request headers take part in the key.
    pub fn uses_headers(&self) -> bool {
        matches!(self, Self::PathHeaders | Self::PathParamsHeaders)
    }
}

impl std::fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path-only" => Ok(Self::PathOnly),
            "path-params" => Ok(Self::PathParams),
            "path-headers" => Ok(Self::PathHeaders),
            "path-params-headers" => Ok(Self::PathParamsHeaders),
            other => Err(ConfigError::Invalid(format!("unknown key strategy '{}'", other))),
        }
    }
}

/// Optional cache settings at one configuration tier.
///
/// `None` means "inherit from the tier below".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<KeyStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_headers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_params: Option<Vec<String>>,
}

/// Effective cache configuration for one path after inheritance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCacheConfig {
    /// Whether responses for this path are cached at all.
    pub enabled: bool,
    /// Expected entry version; bumping it busts every entry of the path.
    pub version: u32,
    /// Explicit TTL in seconds. `None` falls back to the global default.
    pub ttl: Option<u64>,
    /// Key derivation strategy.
    pub strategy: KeyStrategy,
    /// Headers folded into the key for header strategies.
    pub key_headers: Vec<String>,
    /// Parameters folded into the key. `None` (or empty) means all of them.
    pub key_params: Option<Vec<String>>,
}

impl Default for ResolvedCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version: 1,
            ttl: None,
            strategy: KeyStrategy::default(),
            key_headers: Vec::new(),
            key_params: None,
        }
    }
}

/// Cache tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Fallback TTL when nothing more specific is configured.
    pub default_ttl: u64,
    /// Hard ceiling for any TTL and absolute maximum entry age.
    pub max_ttl: u64,
    /// Fraction of the TTL used as jitter in both directions.
    pub ttl_variance: f64,
    /// Payloads larger than this are stored gzip-compressed.
    pub compression_threshold_bytes: usize,
    /// Maximum number of keys remembered per path in the index.
    pub index_cap_per_path: usize,
    /// TTL for upstream responses with an empty body.
    pub empty_response_ttl: u64,
    /// Lifetime of the background refresh marker.
    pub update_lock_ttl: u64,
    /// Global cache version used when no tier sets one.
    pub version: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECS,
            max_ttl: MAX_TTL_SECS,
            ttl_variance: DEFAULT_TTL_VARIANCE,
            compression_threshold_bytes: COMPRESSION_THRESHOLD_BYTES,
            index_cap_per_path: INDEX_CAP_PER_PATH,
            empty_response_ttl: EMPTY_RESPONSE_TTL_SECS,
            update_lock_ttl: UPDATE_LOCK_TTL_SECS,
            version: 1,
        }
    }
}

/// Circuit breaker tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker denies traffic before probing.
    pub timeout_secs: u64,
    /// How far a cached entry's expiry is pushed out when the breaker opens.
    pub extension_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 60,
            extension_secs: 3600,
        }
    }
}

/// Upstream timeouts per purpose, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Synchronous fetch on a cache miss.
    pub miss_ms: u64,
    /// Background stale-while-revalidate refresh.
    pub refresh_ms: u64,
    /// Proactive cache warming.
    pub warm_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            miss_ms: 10_000,
            refresh_ms: 8_000,
            warm_ms: 5_000,
        }
    }
}

/// Admin surface settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    /// Whether the admin endpoints are mounted.
    pub enabled: bool,
    /// Path prefix the admin endpoints live under.
    pub prefix: String,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: "/__cache".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines (for production/log aggregation).
    #[default]
    Json,
    /// Human-readable single lines.
    Compact,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive, e.g. `info` or `edge_cache=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// An upstream route: requests under `prefix` are forwarded to `upstream`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix (e.g., "/api/products").
    pub prefix: String,
    /// Upstream base URL (e.g., "https://products.internal").
    pub upstream: String,
    /// Route-level cache defaults.
    #[serde(default)]
    pub cache: CacheOverrides,
}

impl RouteConfig {
    /// Create a new route.
    pub fn new(prefix: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            upstream: upstream.into(),
            cache: CacheOverrides::default(),
        }
    }

    /// Set route-level cache defaults.
    pub fn with_cache(mut self, cache: CacheOverrides) -> Self {
        self.cache = cache;
        self
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub cache: CacheSettings,
    pub breaker: BreakerSettings,
    pub timeouts: TimeoutSettings,
    pub admin: AdminSettings,
    pub logging: LogSettings,
    /// Global cache defaults.
    pub global: CacheOverrides,
    /// Upstream routes.
    pub routes: Vec<RouteConfig>,
    /// Per-path cache overrides keyed by exact path.
    pub paths: BTreeMap<String, CacheOverrides>,
}

impl GatewayConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document.
    pub fn from_json_slice(content: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_slice(content.as_bytes())
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Load from a file, falling back to defaults when it is missing or malformed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path.as_ref()).unwrap_or_else(|err| {
            warn!(error = %err, "gateway config unusable, using defaults");
            Self::default()
        })
    }

    /// Build from a stored JSON document, falling back to defaults.
    ///
    /// A missing or malformed document never stops the gateway.
    pub fn from_stored(raw: Option<&[u8]>) -> Self {
        match raw {
            None => Self::default(),
            Some(bytes) => Self::from_json_slice(bytes).unwrap_or_else(|err| {
                warn!(error = %err, "stored gateway config is malformed, using defaults");
                Self::default()
            }),
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_ttl == 0 {
            return Err(ConfigError::Invalid("cache.max_ttl must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.cache.ttl_variance) {
            return Err(ConfigError::Invalid(
                "cache.ttl_variance must be between 0 and 1".into(),
            ));
        }
        if self.cache.index_cap_per_path == 0 {
            return Err(ConfigError::Invalid(
                "cache.index_cap_per_path must be positive".into(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be positive".into(),
            ));
        }
        if self.timeouts.warm_ms >= self.timeouts.refresh_ms {
            return Err(ConfigError::Invalid(
                "timeouts.warm_ms must be shorter than timeouts.refresh_ms".into(),
            ));
        }
        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "route prefix '{}' must start with '/'",
                    route.prefix
                )));
            }
            let uri: http::Uri = route.upstream.parse().map_err(|e| {
                ConfigError::Invalid(format!("route upstream '{}': {}", route.upstream, e))
            })?;
            if uri.host().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "route upstream '{}' has no host",
                    route.upstream
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.cache.default_ttl, 300);
        assert_eq!(config.cache.max_ttl, 86_400);
        assert_eq!(config.cache.compression_threshold_bytes, 10_240);
        assert_eq!(config.cache.index_cap_per_path, 1000);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [cache]
            default_ttl = 120

            [[routes]]
            prefix = "/api"
            upstream = "https://api.internal"

            [routes.cache]
            ttl = 60
            strategy = "path-headers"
            key_headers = ["Accept-Language"]

            [paths."/api/products"]
            key_params = ["page"]
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.default_ttl, 120);
        assert_eq!(config.cache.max_ttl, 86_400);
        assert_eq!(config.routes[0].cache.ttl, Some(60));
        assert_eq!(
            config.routes[0].cache.strategy,
            Some(KeyStrategy::PathHeaders)
        );
        assert_eq!(
            config.paths["/api/products"].key_params,
            Some(vec!["page".to_string()])
        );
    }

    #[test]
    fn test_warm_timeout_must_be_shorter_than_refresh() {
        let mut config = GatewayConfig::default();
        config.timeouts.warm_ms = config.timeouts.refresh_ms;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_route_upstream_requires_host() {
        let mut config = GatewayConfig::default();
        config.routes.push(RouteConfig::new("/api", "/relative"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_stored_falls_back_on_garbage() {
        let config = GatewayConfig::from_stored(Some(b"{not json"));
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(GatewayConfig::from_stored(None), GatewayConfig::default());
    }

    #[test]
    fn test_strategy_round_trips_through_str() {
        for strategy in [
            KeyStrategy::PathOnly,
            KeyStrategy::PathParams,
            KeyStrategy::PathHeaders,
            KeyStrategy::PathParamsHeaders,
        ] {
            assert_eq!(strategy.as_str().parse::<KeyStrategy>().unwrap(), strategy);
        }
        assert!("path-cookies".parse::<KeyStrategy>().is_err());
    }
}
