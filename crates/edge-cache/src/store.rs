//! Entry store: persistence, compression, the path index and soft expiry.
//!
//! Storage faults never escape this module. Reads degrade to "absent",
//! writes to `false`, bulk operations to a partial count.

use std::collections::BTreeMap;
use std::time::Duration;

use edge_core::{CacheSettings, SharedClock};
use edge_kv::{get_json, put_json, SharedStore};
use tracing::{debug, info, warn};

use crate::compression::{compress, decompress};
use crate::entry::{CacheEntry, EntryData};
use crate::error::CacheResult;
use crate::index::{glob_to_regex, PathIndex, INDEX_KEY};
use crate::key::{ParsedCacheKey, CACHE_KEY_PREFIX};
use crate::policy::TtlPolicy;
use crate::stats::{CacheStats, EntryPreview, OutcomeCounters, STATS_KEY};
use crate::status::CacheStatus;

const UPDATING_SUFFIX: &str = ":updating";

/// How the lifetime of a new entry is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTtl {
    /// Explicit or default TTL, clamped and jittered.
    Policy(Option<u64>),
    /// Exactly this many seconds (still clamped to the ceiling).
    Exact(u64),
}

/// Everything needed to write an entry.
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub data: &'a str,
    pub version: u32,
    pub path: &'a str,
    pub headers: BTreeMap<String, String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub ttl: EntryTtl,
}

impl<'a> NewEntry<'a> {
    pub fn new(data: &'a str, version: u32, path: &'a str) -> Self {
        Self {
            data,
            version,
            path,
            headers: BTreeMap::new(),
            etag: None,
            last_modified: None,
            ttl: EntryTtl::Policy(None),
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_ttl(mut self, ttl: EntryTtl) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_validators(mut self, etag: Option<String>, last_modified: Option<String>) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self
    }
}

/// Owns the lifecycle of cache entries in the shared store.
///
/// Cheap to clone; clones share the store and clock.
#[derive(Clone)]
pub struct EntryStore {
    kv: SharedStore,
    clock: SharedClock,
    policy: TtlPolicy,
    compression_threshold: usize,
    index_cap: usize,
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("policy", &self.policy)
            .field("compression_threshold", &self.compression_threshold)
            .field("index_cap", &self.index_cap)
            .finish()
    }
}

fn is_entry_key(key: &str) -> bool {
    key.starts_with(CACHE_KEY_PREFIX) && !key.ends_with(UPDATING_SUFFIX)
}

/// Decompress a stored entry in place, keeping the raw bytes on failure.
fn inflate(key: &str, mut entry: CacheEntry) -> CacheEntry {
    if !entry.compressed {
        return entry;
    }
    if let EntryData::Bytes(raw) = &entry.data {
        match decompress(raw) {
            Ok(bytes) => {
                entry.data = match String::from_utf8(bytes) {
                    Ok(text) => EntryData::Text(text),
                    Err(e) => EntryData::Bytes(e.into_bytes()),
                };
            }
            Err(e) => {
                warn!(cache_key = key, error = %e, "decompression failed, using stored bytes");
            }
        }
    }
    entry
}

impl EntryStore {
    pub fn new(kv: SharedStore, clock: SharedClock, settings: &CacheSettings) -> Self {
        Self {
            kv,
            clock,
            policy: TtlPolicy::from(settings),
            compression_threshold: settings.compression_threshold_bytes,
            index_cap: settings.index_cap_per_path,
        }
    }

    /// The TTL policy entries are written and judged with.
    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// The underlying store.
    pub fn kv(&self) -> &SharedStore {
        &self.kv
    }

    /// Current time in ms.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Read a record as stored, with its size. No decompression.
    async fn read_record(&self, key: &str) -> Option<(CacheEntry, usize)> {
        let bytes = match self.kv.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(cache_key = key, error = %e, "cache read failed");
                return None;
            }
        };
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Some((entry, bytes.len())),
            Err(e) => {
                warn!(cache_key = key, error = %e, "malformed cache entry ignored");
                None
            }
        }
    }

    async fn load_raw(&self, key: &str) -> Option<CacheEntry> {
        self.read_record(key).await.map(|(entry, _)| entry)
    }

    async fn write_entry(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        put_json(self.kv.as_ref(), key, entry, None).await?;
        Ok(())
    }

    /// Fetch an entry, decompressing its payload.
    ///
    /// Missing, unreadable and malformed records all read as `None`.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.load_raw(key).await?;
        Some(inflate(key, entry))
    }

    /// Write an entry and index it under its path.
    ///
    /// Returns `false` on any storage failure; callers carry on uncached.
    pub async fn save(&self, key: &str, new: NewEntry<'_>) -> bool {
        let (data, compressed) = if new.data.len() > self.compression_threshold {
            match compress(new.data.as_bytes()) {
                Ok(packed) => (EntryData::Bytes(packed), true),
                Err(e) => {
                    warn!(cache_key = key, error = %e, "compression failed, storing uncompressed");
                    (EntryData::Text(new.data.to_string()), false)
                }
            }
        } else {
            (EntryData::Text(new.data.to_string()), false)
        };

        let ttl = match new.ttl {
            EntryTtl::Policy(explicit) => self.policy.compute(explicit),
            EntryTtl::Exact(ttl) => self.policy.effective_ttl(Some(ttl)),
        };

        let mut entry = CacheEntry::new(data, new.version, self.now_ms(), ttl, new.path);
        entry.compressed = compressed;
        entry.headers = new.headers;
        entry.etag = new.etag;
        entry.last_modified = new.last_modified;

        if let Err(e) = self.write_entry(key, &entry).await {
            warn!(cache_key = key, error = %e, "cache write failed");
            return false;
        }
        debug!(cache_key = key, path = new.path, ttl, compressed, "cache entry saved");

        self.index_key(new.path, key).await;
        true
    }

    /// Load the path index; unreadable indexes start over empty.
    pub async fn load_index(&self) -> PathIndex {
        match get_json::<PathIndex>(self.kv.as_ref(), INDEX_KEY).await {
            Ok(index) => index.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "cache index unreadable");
                PathIndex::new()
            }
        }
    }

    async fn save_index(&self, index: &PathIndex) {
        if let Err(e) = put_json(self.kv.as_ref(), INDEX_KEY, index, None).await {
            warn!(error = %e, "cache index write failed");
        }
    }

    async fn index_key(&self, path: &str, key: &str) {
        let mut index = self.load_index().await;
        if index.add(path, key, self.index_cap) {
            self.save_index(&index).await;
        }
    }

    /// Soft-expire every entry whose path matches a `*` glob, or the single
    /// entry when `pattern` is a cache key.
    ///
    /// Entries keep their data and gain an `invalidatedAt` marker. Returns
    /// how many were newly invalidated; repeating the call returns 0.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let keys: Vec<String> = if pattern.starts_with(CACHE_KEY_PREFIX) {
            vec![pattern.to_string()]
        } else {
            let regex = match glob_to_regex(pattern) {
                Ok(regex) => regex,
                Err(e) => {
                    warn!(pattern, error = %e, "invalid invalidation pattern");
                    return 0;
                }
            };
            self.load_index().await.matching(&regex).cloned().collect()
        };

        let now = self.now_ms();
        let mut invalidated = 0;
        for key in keys {
            let Some(mut entry) = self.load_raw(&key).await else {
                continue;
            };
            if entry.is_invalidated() && self.policy.expires_at(&entry) < now {
                continue;
            }
            entry.expires_at = Some(now.saturating_sub(1));
            entry.invalidated_at = Some(now);
            match self.write_entry(&key, &entry).await {
                Ok(()) => invalidated += 1,
                Err(e) => warn!(cache_key = %key, error = %e, "failed to invalidate entry"),
            }
        }

        info!(pattern, invalidated, "cache invalidated");
        invalidated
    }

    /// Physically remove an entry and its index reference.
    ///
    /// Returns whether an entry existed and was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let existed = match self.kv.get(key).await {
            Ok(value) => value.is_some(),
            Err(e) => {
                warn!(cache_key = key, error = %e, "cache read failed before delete");
                return false;
            }
        };
        if let Err(e) = self.kv.delete(key).await {
            warn!(cache_key = key, error = %e, "cache delete failed");
            return false;
        }

        let mut index = self.load_index().await;
        let removed = match ParsedCacheKey::parse(key) {
            Ok(parsed) => index.remove_from(&parsed.path, key),
            Err(_) => index.remove_key(key),
        };
        if removed {
            self.save_index(&index).await;
        }

        info!(cache_key = key, existed, "cache entry deleted");
        existed
    }

    /// Push an entry's expiry out by `by`, counted from now if it already
    /// expired. Invalidated entries are left alone.
    pub async fn extend_ttl(&self, key: &str, by: Duration) -> bool {
        let Some(mut entry) = self.load_raw(key).await else {
            return false;
        };
        if entry.is_invalidated() {
            return false;
        }

        let now = self.now_ms();
        let base = self.policy.expires_at(&entry).max(now);
        let expires_at = base + by.as_millis() as u64;
        entry.expires_at = Some(expires_at);
        entry.circuit_breaker_extended = Some(true);
        entry.circuit_breaker_extended_at = Some(now);

        match self.write_entry(key, &entry).await {
            Ok(()) => {
                info!(cache_key = key, expires_at, "cache entry lifetime extended");
                true
            }
            Err(e) => {
                warn!(cache_key = key, error = %e, "failed to extend cache entry");
                false
            }
        }
    }

    /// Whether a usable, unexpired entry of `version` exists at `key`.
    pub async fn is_fresh(&self, key: &str, version: u32) -> bool {
        match self.load_raw(key).await {
            Some(entry) => {
                entry.version == version
                    && !entry.is_invalidated()
                    && !self.policy.is_expired(&entry, self.now_ms())
            }
            None => false,
        }
    }

    /// Count a lookup outcome. Best effort.
    pub async fn record_outcome(&self, status: CacheStatus) {
        if status == CacheStatus::Bypass {
            return;
        }
        let mut counters = match get_json::<OutcomeCounters>(self.kv.as_ref(), STATS_KEY).await {
            Ok(counters) => counters.unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "outcome counters unreadable");
                return;
            }
        };
        counters.record(status);
        if let Err(e) = put_json(self.kv.as_ref(), STATS_KEY, &counters, None).await {
            debug!(error = %e, "outcome counters not updated");
        }
    }

    /// Entry counts, stored size and traffic counters.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let now = self.now_ms();

        let keys = match self.kv.list_keys(CACHE_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cache key listing failed");
                Vec::new()
            }
        };
        for key in keys.iter().filter(|k| is_entry_key(k)) {
            let Some((entry, size)) = self.read_record(key).await else {
                continue;
            };
            stats.total_entries += 1;
            stats.estimated_bytes += size;
            if entry.compressed {
                stats.compressed_entries += 1;
            }
            if self.policy.is_expired(&entry, now) {
                stats.stale_entries += 1;
            } else {
                stats.fresh_entries += 1;
            }
        }

        stats.indexed_paths = self.load_index().await.path_count();

        let counters = get_json::<OutcomeCounters>(self.kv.as_ref(), STATS_KEY)
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        stats.hits = counters.hits;
        stats.misses = counters.misses;
        stats.stale_hits = counters.stale_hits;
        stats.hit_rate = counters.hit_rate();
        stats
    }

    /// Preview a single entry.
    pub async fn preview_key(&self, key: &str, include_content: bool) -> Option<EntryPreview> {
        let entry = self.load_raw(key).await?;
        let mut preview = EntryPreview::from_entry(key, &entry, &self.policy, self.now_ms());
        if include_content {
            preview.content = Some(inflate(key, entry).data.to_text_lossy());
        }
        Some(preview)
    }

    /// Preview every indexed entry of `path` at `version`.
    pub async fn preview(
        &self,
        path: &str,
        version: u32,
        include_content: bool,
    ) -> Vec<EntryPreview> {
        let index = self.load_index().await;
        let mut previews = Vec::new();
        for key in index.keys_for(path) {
            if let Some(preview) = self.preview_key(key, include_content).await {
                if preview.version == version {
                    previews.push(preview);
                }
            }
        }
        previews
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheKeyBuilder;
    use edge_core::ManualClock;
    use edge_kv::{KvStore, MemoryStore};
    use std::sync::Arc;

    const T0: u64 = 1_700_000_000_000;

    fn setup() -> (EntryStore, MemoryStore, ManualClock) {
        let clock = ManualClock::new(T0);
        let kv = MemoryStore::with_clock(Arc::new(clock.clone()));
        let store = EntryStore::new(
            Arc::new(kv.clone()),
            Arc::new(clock.clone()),
            &CacheSettings::default(),
        );
        (store, kv, clock)
    }

    fn key(path: &str) -> String {
        CacheKeyBuilder::new(path, 1).build().to_string()
    }

    #[tokio::test]
    async fn test_save_get_small_payload() {
        let (store, _, _) = setup();
        let k = key("/p");
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        let saved = store
            .save(
                &k,
                NewEntry::new(r#"{"ok":true}"#, 1, "/p")
                    .with_headers(headers.clone())
                    .with_validators(Some("\"v1\"".into()), None),
            )
            .await;
        assert!(saved);

        let entry = store.get(&k).await.unwrap();
        assert_eq!(entry.data, EntryData::Text(r#"{"ok":true}"#.into()));
        assert!(!entry.compressed);
        assert_eq!(entry.created_at, T0);
        assert_eq!(entry.headers, headers);
        assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
        let ttl = entry.ttl.unwrap();
        assert!((270..=330).contains(&ttl));
        assert_eq!(entry.expires_at, Some(T0 + ttl * 1000));
    }

    #[tokio::test]
    async fn test_large_payload_compressed_and_round_trips() {
        let (store, kv, _) = setup();
        let k = key("/big");
        let body: String = (0..4000).map(|i| format!("item-{};", i)).collect();
        assert!(body.len() > 10 * 1024);

        assert!(store.save(&k, NewEntry::new(&body, 1, "/big")).await);

        let raw: CacheEntry =
            serde_json::from_slice(&kv.get(&k).await.unwrap().unwrap()).unwrap();
        assert!(raw.compressed);
        assert!(matches!(raw.data, EntryData::Bytes(_)));

        let entry = store.get(&k).await.unwrap();
        assert_eq!(entry.data.as_bytes(), body.as_bytes());
    }

    #[tokio::test]
    async fn test_corrupt_compressed_payload_falls_back_to_raw() {
        let (store, kv, _) = setup();
        let k = key("/bad");
        let mut entry = CacheEntry::new(EntryData::Bytes(b"not gzip".to_vec()), 1, T0, 300, "/bad");
        entry.compressed = true;
        kv.put(&k, &serde_json::to_vec(&entry).unwrap(), None)
            .await
            .unwrap();

        let read = store.get(&k).await.unwrap();
        assert_eq!(read.data.as_bytes(), b"not gzip");
    }

    #[tokio::test]
    async fn test_malformed_record_reads_as_absent() {
        let (store, kv, _) = setup();
        kv.put("cache:v1:/x:abc", br#"{"data":"x"}"#, None)
            .await
            .unwrap();
        assert!(store.get("cache:v1:/x:abc").await.is_none());
    }

    #[tokio::test]
    async fn test_storage_faults_degrade() {
        let (store, kv, _) = setup();
        kv.fail_writes(true);
        assert!(!store.save(&key("/p"), NewEntry::new("x", 1, "/p")).await);

        kv.fail_writes(false);
        assert!(store.save(&key("/p"), NewEntry::new("x", 1, "/p")).await);
        kv.fail_reads(true);
        assert!(store.get(&key("/p")).await.is_none());
        assert_eq!(store.invalidate("/p").await, 0);
    }

    #[tokio::test]
    async fn test_exact_ttl_skips_jitter() {
        let (store, _, _) = setup();
        let k = key("/empty");
        store
            .save(&k, NewEntry::new("", 1, "/empty").with_ttl(EntryTtl::Exact(30)))
            .await;
        assert_eq!(store.get(&k).await.unwrap().ttl, Some(30));
    }

    #[tokio::test]
    async fn test_index_tracks_saved_keys() {
        let (store, _, _) = setup();
        let k1 = CacheKeyBuilder::new("/p", 1).build().to_string();
        let k2 = CacheKeyBuilder::new("/p", 2).build().to_string();
        store.save(&k1, NewEntry::new("a", 1, "/p")).await;
        store.save(&k2, NewEntry::new("b", 2, "/p")).await;
        store.save(&k1, NewEntry::new("a", 1, "/p")).await;

        let index = store.load_index().await;
        assert_eq!(index.keys_for("/p"), [k1, k2]);
    }

    #[tokio::test]
    async fn test_invalidate_is_soft_and_idempotent() {
        let (store, _, _) = setup();
        let a = key("/api/products/1");
        let b = key("/api/products/2");
        let other = key("/api/users/1");
        store.save(&a, NewEntry::new("a", 1, "/api/products/1")).await;
        store.save(&b, NewEntry::new("b", 1, "/api/products/2")).await;
        store.save(&other, NewEntry::new("c", 1, "/api/users/1")).await;

        assert_eq!(store.invalidate("/api/products/*").await, 2);
        assert_eq!(store.invalidate("/api/products/*").await, 0);

        let entry = store.get(&a).await.unwrap();
        assert!(entry.expires_at.unwrap() < store.now_ms());
        assert_eq!(entry.invalidated_at, Some(T0));
        assert_eq!(entry.data, EntryData::Text("a".into()));
        assert!(store.get(&other).await.unwrap().invalidated_at.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_single_key() {
        let (store, _, _) = setup();
        let a = key("/a");
        store.save(&a, NewEntry::new("a", 1, "/a")).await;
        assert_eq!(store.invalidate(&a).await, 1);
        assert_eq!(store.invalidate(&a).await, 0);
        assert_eq!(store.invalidate("cache:v1:/missing:00").await, 0);
    }

    #[tokio::test]
    async fn test_resave_clears_invalidation() {
        let (store, _, _) = setup();
        let a = key("/a");
        store.save(&a, NewEntry::new("a", 1, "/a")).await;
        store.invalidate("/a").await;
        store.save(&a, NewEntry::new("a2", 1, "/a")).await;
        assert!(store.is_fresh(&a, 1).await);
        assert_eq!(store.invalidate("/a").await, 1);
    }

    #[tokio::test]
    async fn test_delete_is_hard() {
        let (store, _, _) = setup();
        let a = key("/a");
        store.save(&a, NewEntry::new("a", 1, "/a")).await;

        assert!(store.delete(&a).await);
        assert!(store.get(&a).await.is_none());
        assert!(store.load_index().await.keys_for("/a").is_empty());
        assert!(!store.delete(&a).await);
    }

    #[tokio::test]
    async fn test_extend_ttl_from_now_when_expired() {
        let (store, _, clock) = setup();
        let a = key("/a");
        store
            .save(&a, NewEntry::new("a", 1, "/a").with_ttl(EntryTtl::Exact(60)))
            .await;
        clock.advance(Duration::from_secs(120));

        assert!(store.extend_ttl(&a, Duration::from_secs(3600)).await);
        let entry = store.get(&a).await.unwrap();
        assert_eq!(entry.expires_at, Some(store.now_ms() + 3_600_000));
        assert_eq!(entry.circuit_breaker_extended, Some(true));
        assert!(store.is_fresh(&a, 1).await);
    }

    #[tokio::test]
    async fn test_extend_ttl_skips_invalidated() {
        let (store, _, _) = setup();
        let a = key("/a");
        store.save(&a, NewEntry::new("a", 1, "/a")).await;
        store.invalidate(&a).await;
        assert!(!store.extend_ttl(&a, Duration::from_secs(3600)).await);
        assert!(!store.extend_ttl(&key("/missing"), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, kv, clock) = setup();
        let big: String = "x".repeat(20_000);
        store
            .save(&key("/a"), NewEntry::new("a", 1, "/a").with_ttl(EntryTtl::Exact(60)))
            .await;
        store.save(&key("/b"), NewEntry::new(&big, 1, "/b")).await;
        kv.put(&format!("{}:updating", key("/b")), b"1", None)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(120));

        store.record_outcome(CacheStatus::Hit).await;
        store.record_outcome(CacheStatus::Miss).await;
        store.record_outcome(CacheStatus::Bypass).await;

        let stats = store.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.stale_entries, 1);
        assert_eq!(stats.fresh_entries, 1);
        assert_eq!(stats.compressed_entries, 1);
        assert_eq!(stats.indexed_paths, 2);
        assert!(stats.estimated_bytes > 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_preview() {
        let (store, _, clock) = setup();
        let v1 = CacheKeyBuilder::new("/p", 1).build().to_string();
        let v2 = CacheKeyBuilder::new("/p", 2).build().to_string();
        let body = "y".repeat(12_000);
        store
            .save(&v1, NewEntry::new(&body, 1, "/p").with_ttl(EntryTtl::Exact(300)))
            .await;
        store.save(&v2, NewEntry::new("other", 2, "/p")).await;
        clock.advance(Duration::from_secs(100));

        let previews = store.preview("/p", 1, true).await;
        assert_eq!(previews.len(), 1);
        let preview = &previews[0];
        assert_eq!(preview.key, v1);
        assert_eq!(preview.age_secs, 100);
        assert_eq!(preview.remaining_ttl_secs, 200);
        assert!(preview.compressed);
        assert!(!preview.expired);
        assert_eq!(preview.content.as_deref(), Some(body.as_str()));

        let bare = store.preview("/p", 2, false).await;
        assert_eq!(bare[0].content, None);
    }
}
