//! Cache statistics and entry previews for the admin surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::policy::TtlPolicy;
use crate::status::CacheStatus;

/// Store key of the outcome counters.
pub const STATS_KEY: &str = "stats:outcomes";

/// Lookup outcome counters.
///
/// Updated by read-modify-write without coordination, so concurrent
/// requests can drop increments. Good enough for a hit-rate estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomeCounters {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
}

impl OutcomeCounters {
    /// Count one lookup. Bypassed requests are not counted.
    pub fn record(&mut self, status: CacheStatus) {
        match status {
            CacheStatus::Hit => self.hits += 1,
            CacheStatus::Miss => self.misses += 1,
            CacheStatus::Stale => self.stale_hits += 1,
            CacheStatus::Bypass => {}
        }
    }

    /// Share of lookups answered from cache, fresh or stale.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

/// Snapshot of the cache contents and traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
    pub compressed_entries: usize,
    /// Sum of stored record sizes.
    pub estimated_bytes: usize,
    pub indexed_paths: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub hit_rate: f64,
}

/// Metadata (and optionally the body) of one stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPreview {
    pub key: String,
    pub path: String,
    pub version: u32,
    pub created_at: u64,
    pub expires_at: u64,
    pub ttl: Option<u64>,
    pub age_secs: u64,
    pub remaining_ttl_secs: u64,
    pub expired: bool,
    pub compressed: bool,
    /// Stored payload size in bytes.
    pub size_bytes: usize,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidated_at: Option<u64>,
    pub circuit_breaker_extended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_extended_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl EntryPreview {
    /// Describe a stored (still compressed) entry.
    pub fn from_entry(key: &str, entry: &CacheEntry, policy: &TtlPolicy, now_ms: u64) -> Self {
        let expires_at = policy.expires_at(entry);
        Self {
            key: key.to_string(),
            path: entry.path.clone(),
            version: entry.version,
            created_at: entry.created_at,
            expires_at,
            ttl: entry.ttl,
            age_secs: entry.age_ms(now_ms) / 1000,
            remaining_ttl_secs: expires_at.saturating_sub(now_ms) / 1000,
            expired: policy.is_expired(entry, now_ms),
            compressed: entry.compressed,
            size_bytes: entry.data.len(),
            headers: entry.headers.clone(),
            etag: entry.etag.clone(),
            last_modified: entry.last_modified.clone(),
            invalidated_at: entry.invalidated_at,
            circuit_breaker_extended: entry.circuit_breaker_extended.unwrap_or(false),
            circuit_breaker_extended_at: entry.circuit_breaker_extended_at,
            content: None,
        }
    }
}
