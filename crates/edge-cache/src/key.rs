//! Cache key derivation.
//!
//! Keys have the form `cache:v{version}:{path}:{sha256hex}`. The hash covers
//! the path plus the strategy-specific parts, joined with `|`. Administrative
//! tooling parses this format, so it must stay stable.

use std::collections::BTreeMap;

use edge_core::{GatewayRequest, Headers, KeyStrategy, Method, Params, ResolvedCacheConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};

/// Prefix shared by every cache entry key.
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// A derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an existing key string without validation.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the background refresh marker for this entry.
    pub fn update_lock(&self) -> String {
        format!("{}:updating", self.0)
    }

    /// Parse back into its components.
    pub fn parse(&self) -> CacheResult<ParsedCacheKey> {
        ParsedCacheKey::parse(&self.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Components of a cache key string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCacheKey {
    pub version: u32,
    pub path: String,
    pub hash: String,
}

impl ParsedCacheKey {
    /// Parse `cache:v{version}:{path}:{hash}`.
    ///
    /// Paths may contain `:`; the hash is always the last segment.
    pub fn parse(key: &str) -> CacheResult<Self> {
        let invalid = || CacheError::InvalidKey(key.to_string());

        let rest = key.strip_prefix("cache:v").ok_or_else(invalid)?;
        let (version, rest) = rest.split_once(':').ok_or_else(invalid)?;
        let version = version.parse::<u32>().map_err(|_| invalid())?;
        let (path, hash) = rest.rsplit_once(':').ok_or_else(invalid)?;

        let is_hash = hash.len() == 64
            && hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if path.is_empty() || !is_hash {
            return Err(invalid());
        }

        Ok(Self {
            version,
            path: path.to_string(),
            hash: hash.to_string(),
        })
    }
}

/// Builder for composing cache keys.
///
/// # Example
///
/// ```ignore
/// let key = CacheKeyBuilder::new("/api/products", 1)
///     .strategy(KeyStrategy::PathParamsHeaders)
///     .params(&params)
///     .key_params(&["page".to_string()])
///     .headers(&headers)
///     .key_headers(&["Accept-Language".to_string()])
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder<'a> {
    path: &'a str,
    version: u32,
    strategy: KeyStrategy,
    params: Option<&'a Params>,
    key_params: Option<&'a [String]>,
    headers: Option<&'a Headers>,
    key_headers: &'a [String],
    method: Method,
}

impl<'a> CacheKeyBuilder<'a> {
    /// Start a key for `path` at cache `version` (path-only by default).
    pub fn new(path: &'a str, version: u32) -> Self {
        Self {
            path,
            version,
            strategy: KeyStrategy::PathOnly,
            params: None,
            key_params: None,
            headers: None,
            key_headers: &[],
            method: Method::Get,
        }
    }

    /// Set the derivation strategy.
    pub fn strategy(mut self, strategy: KeyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Request parameters (query string or JSON body).
    pub fn params(mut self, params: &'a Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Restrict parameters to this subset. Empty means all.
    pub fn key_params(mut self, names: &'a [String]) -> Self {
        self.key_params = Some(names);
        self
    }

    /// Request headers.
    pub fn headers(mut self, headers: &'a Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Headers folded into the key (matched case-insensitively).
    pub fn key_headers(mut self, names: &'a [String]) -> Self {
        self.key_headers = names;
        self
    }

    /// Request method. GET and HEAD share entries; any other method gets
    /// its own.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    fn params_part(&self) -> String {
        let empty = Params::new();
        let params = self.params.unwrap_or(&empty);
        let selected: Params = match self.key_params {
            Some(names) if !names.is_empty() => names
                .iter()
                .filter_map(|name| params.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
            _ => params.clone(),
        };
        // serde_json maps iterate (and serialize) in sorted key order.
        Value::Object(selected).to_string()
    }

    fn headers_part(&self) -> Option<String> {
        let headers = self.headers?;
        let wanted: Vec<String> = self
            .key_headers
            .iter()
            .map(|name| name.to_ascii_lowercase())
            .collect();

        let selected: BTreeMap<String, &str> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .filter(|(name, _)| wanted.contains(name))
            .collect();

        if selected.is_empty() {
            return None;
        }
        serde_json::to_string(&selected).ok()
    }

    /// Hash the parts and format the key.
    pub fn build(&self) -> CacheKey {
        let mut parts = vec![self.path.to_string()];

        match self.strategy {
            KeyStrategy::PathOnly => {}
            KeyStrategy::PathParams => parts.push(self.params_part()),
            KeyStrategy::PathHeaders => {
                if let Some(headers) = self.headers_part() {
                    parts.push(headers);
                }
            }
            KeyStrategy::PathParamsHeaders => {
                parts.push(format!("params:{}", self.params_part()));
                parts.push(format!(
                    "headers:{}",
                    self.headers_part().unwrap_or_else(|| "{}".to_string())
                ));
            }
        }
        if !matches!(self.method, Method::Get | Method::Head) {
            parts.push(format!("method:{}", self.method));
        }

        let digest = Sha256::digest(parts.join("|").as_bytes());
        CacheKey(format!(
            "cache:v{}:{}:{}",
            self.version,
            self.path,
            hex::encode(digest)
        ))
    }
}

/// Derive the key for a request under its resolved cache config.
pub fn derive_key(
    path: &str,
    config: &ResolvedCacheConfig,
    params: &Params,
    headers: &Headers,
) -> CacheKey {
    let mut builder = CacheKeyBuilder::new(path, config.version)
        .strategy(config.strategy)
        .params(params)
        .headers(headers)
        .key_headers(&config.key_headers);
    if let Some(names) = &config.key_params {
        builder = builder.key_params(names);
    }
    builder.build()
}

/// Derive the key for an inbound request, folding in its method.
pub fn derive_request_key(request: &GatewayRequest, config: &ResolvedCacheConfig) -> CacheKey {
    let params = request.params();
    let mut builder = CacheKeyBuilder::new(&request.path, config.version)
        .strategy(config.strategy)
        .params(&params)
        .headers(&request.headers)
        .key_headers(&config.key_headers)
        .method(request.method);
    if let Some(names) = &config.key_params {
        builder = builder.key_params(names);
    }
    builder.build()
}

/// Older call form: every parameter, version given separately.
///
/// Equivalent to the `path-params` strategy with all parameters.
pub fn legacy_key(path: &str, params: &Params, version: u32) -> CacheKey {
    CacheKeyBuilder::new(path, version)
        .strategy(KeyStrategy::PathParams)
        .params(params)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => Params::new(),
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_key_format() {
        let key = CacheKeyBuilder::new("/api/products", 3).build();
        let parsed = key.parse().unwrap();
        assert!(key.as_str().starts_with("cache:v3:/api/products:"));
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.path, "/api/products");
        assert_eq!(parsed.hash.len(), 64);

        // sha256("/api/products")
        let expected = hex::encode(Sha256::digest(b"/api/products"));
        assert_eq!(parsed.hash, expected);
    }

    #[test]
    fn test_param_order_independent() {
        let mut a = Params::new();
        a.insert("page".into(), json!("2"));
        a.insert("sort".into(), json!("asc"));
        let mut b = Params::new();
        b.insert("sort".into(), json!("asc"));
        b.insert("page".into(), json!("2"));

        assert_eq!(
            CacheKeyBuilder::new("/p", 1)
                .strategy(KeyStrategy::PathParams)
                .params(&a)
                .build(),
            CacheKeyBuilder::new("/p", 1)
                .strategy(KeyStrategy::PathParams)
                .params(&b)
                .build()
        );
    }

    #[test]
    fn test_post_body_does_not_share_get_entry() {
        let config = ResolvedCacheConfig::default();
        let get = GatewayRequest::new(Method::Get, "/api/products?page=1");
        let head = GatewayRequest::new(Method::Head, "/api/products?page=1");
        let post =
            GatewayRequest::new(Method::Post, "/api/products").with_body(r#"{"page":"1"}"#);

        let get_key = derive_request_key(&get, &config);
        assert_eq!(get_key, derive_request_key(&head, &config));
        assert_ne!(get_key, derive_request_key(&post, &config));
        assert_eq!(
            get_key,
            derive_key("/api/products", &config, &get.params(), &get.headers)
        );
        assert!(derive_request_key(&post, &config)
            .as_str()
            .starts_with("cache:v1:/api/products:"));
    }

    #[test]
    fn test_param_subset_ignores_extras() {
        let a = params(json!({"page": "2", "utm_source": "mail"}));
        let b = params(json!({"page": "2", "session": "abc"}));
        let subset = vec!["page".to_string()];

        let key = |p: &Params| {
            CacheKeyBuilder::new("/p", 1)
                .strategy(KeyStrategy::PathParams)
                .params(p)
                .key_params(&subset)
                .build()
        };
        assert_eq!(key(&a), key(&b));

        let c = params(json!({"page": "3"}));
        assert_ne!(key(&a), key(&c));
    }

    #[test]
    fn test_header_names_case_insensitive_values_sensitive() {
        let h1 = headers(&[("Authorization", "Bearer x")]);
        let h2 = headers(&[("authorization", "Bearer x")]);
        let h3 = headers(&[("authorization", "bearer x")]);

        let upper = vec!["Authorization".to_string()];
        let lower = vec!["authorization".to_string()];
        let key = |h: &Headers, names: &[String]| {
            CacheKeyBuilder::new("/p", 1)
                .strategy(KeyStrategy::PathHeaders)
                .headers(h)
                .key_headers(names)
                .build()
        };

        assert_eq!(key(&h1, &upper), key(&h2, &lower));
        assert_ne!(key(&h1, &upper), key(&h3, &upper));
    }

    #[test]
    fn test_empty_header_subset_contributes_nothing() {
        let h = headers(&[("Accept-Language", "en")]);
        let with_headers = CacheKeyBuilder::new("/p", 1)
            .strategy(KeyStrategy::PathHeaders)
            .headers(&h)
            .build();
        let path_only = CacheKeyBuilder::new("/p", 1).build();
        assert_eq!(with_headers, path_only);
    }

    #[test]
    fn test_labels_disambiguate_combined_strategy() {
        let p = params(json!({"a": "1"}));
        let h = headers(&[("x-a", "1")]);
        let names = vec!["x-a".to_string()];

        let params_only = CacheKeyBuilder::new("/p", 1)
            .strategy(KeyStrategy::PathParamsHeaders)
            .params(&p)
            .build();
        let both = CacheKeyBuilder::new("/p", 1)
            .strategy(KeyStrategy::PathParamsHeaders)
            .params(&p)
            .headers(&h)
            .key_headers(&names)
            .build();
        let params_strategy = CacheKeyBuilder::new("/p", 1)
            .strategy(KeyStrategy::PathParams)
            .params(&p)
            .build();

        assert_ne!(params_only, both);
        assert_ne!(params_only, params_strategy);
    }

    #[test]
    fn test_version_changes_key() {
        assert_ne!(
            CacheKeyBuilder::new("/p", 1).build(),
            CacheKeyBuilder::new("/p", 2).build()
        );
    }

    #[test]
    fn test_legacy_form_matches_path_params() {
        let p = params(json!({"q": "shoes", "page": 1}));
        let config = ResolvedCacheConfig {
            strategy: KeyStrategy::PathParams,
            version: 4,
            ..Default::default()
        };
        assert_eq!(
            legacy_key("/search", &p, 4),
            derive_key("/search", &config, &p, &Headers::new())
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ParsedCacheKey::parse("cache:v1:/p").is_err());
        assert!(ParsedCacheKey::parse("cache:vx:/p:abc").is_err());
        assert!(ParsedCacheKey::parse("circuit:api.internal").is_err());
        let upper = format!("cache:v1:/p:{}", "A".repeat(64));
        assert!(ParsedCacheKey::parse(&upper).is_err());
    }

    #[test]
    fn test_parse_path_with_colon() {
        let key = CacheKeyBuilder::new("/api/items:batch", 2).build();
        let parsed = key.parse().unwrap();
        assert_eq!(parsed.path, "/api/items:batch");
        assert_eq!(parsed.version, 2);
    }

    #[test]
    fn test_update_lock_key() {
        let key = CacheKey::from_raw("cache:v1:/p:abc");
        assert_eq!(key.update_lock(), "cache:v1:/p:abc:updating");
    }
}
