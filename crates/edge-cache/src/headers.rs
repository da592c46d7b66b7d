//! Header hygiene and cache debugging headers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::status::CacheStatus;

/// Header names for cache debugging.
pub mod header_names {
    /// Cache status header (HIT, MISS, STALE, BYPASS).
    pub const X_CACHE_STATUS: &str = "X-Cache-Status";
    /// Cache key used for lookup.
    pub const X_CACHE_KEY: &str = "X-Cache-Key";
    /// Cache age in seconds.
    pub const X_CACHE_AGE: &str = "X-Cache-Age";
    /// Cache TTL remaining.
    pub const X_CACHE_TTL: &str = "X-Cache-TTL";
    /// Request ID for tracing.
    pub const X_REQUEST_ID: &str = "X-Request-ID";
}

/// Transport-level headers that are never persisted or replayed.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Whether `name` is a hop-by-hop or framing header.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Per-client headers that are passed through but never persisted.
pub const PRIVATE_HEADERS: &[&str] = &["set-cookie", "set-cookie2"];

/// Whether `name` belongs to one client and must not be shared from cache.
pub fn is_private(name: &str) -> bool {
    PRIVATE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Headers forwarded on a pass-through answer: hop-by-hop dropped, names
/// lowercased, repeats kept as separate entries.
pub fn forwardable_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect()
}

/// Headers persisted with an entry: hop-by-hop and private headers
/// dropped, names lowercased.
///
/// Repeated names are joined with `", "`.
pub fn sanitize_headers(headers: &[(String, String)]) -> BTreeMap<String, String> {
    let mut clean: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name) || is_private(name) {
            continue;
        }
        clean
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    clean
}

/// Cache explain headers for debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheExplainHeaders {
    /// Overall cache status.
    pub status: Option<CacheStatus>,
    /// Cache key used.
    pub cache_key: Option<String>,
    /// Age of cached response in seconds.
    pub age_secs: Option<u64>,
    /// Remaining TTL in seconds.
    pub ttl_secs: Option<u64>,
}

impl CacheExplainHeaders {
    pub fn new(status: CacheStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Set cache key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Set age and remaining TTL, both in seconds.
    pub fn with_timing(mut self, age_secs: u64, ttl_secs: u64) -> Self {
        self.age_secs = Some(age_secs);
        self.ttl_secs = Some(ttl_secs);
        self
    }

    /// Convert to HTTP headers.
    pub fn to_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();

        if let Some(status) = &self.status {
            headers.push((header_names::X_CACHE_STATUS.to_string(), status.to_string()));
        }
        if let Some(key) = &self.cache_key {
            headers.push((header_names::X_CACHE_KEY.to_string(), key.clone()));
        }
        if let Some(age) = self.age_secs {
            headers.push((header_names::X_CACHE_AGE.to_string(), age.to_string()));
        }
        if let Some(ttl) = self.ttl_secs {
            headers.push((header_names::X_CACHE_TTL.to_string(), ttl.to_string()));
        }

        headers
    }
}
