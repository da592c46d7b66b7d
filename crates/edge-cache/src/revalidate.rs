//! Request-path cache orchestration with stale-while-revalidate.
//!
//! Per request the outcome is one of:
//! - HIT: usable entry within its lifetime, served as is.
//! - STALE: usable entry past its lifetime, served as is while at most one
//!   background refresh is scheduled through the update lock.
//! - MISS: no usable entry (absent, other version, invalidated); fetched
//!   synchronously and written back.
//! - BYPASS: caching disabled for the path; forwarded untouched.

use std::time::Duration;

use edge_core::{GatewayConfig, Headers, Method, ResolvedCacheConfig, SharedClock, UpstreamTarget};
use edge_data::{
    enforce_deadlines, FetchError, FetchPurpose, FetchTimeouts, SharedUpstream, UpstreamRequest,
    UpstreamResponse,
};
use edge_executor::SharedExecutor;
use edge_kv::SharedStore;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::headers::{forwardable_headers, sanitize_headers, CacheExplainHeaders};
use crate::key::CacheKey;
use crate::status::CacheStatus;
use crate::store::{EntryStore, EntryTtl, NewEntry};

/// A request as the orchestrator sees it: key and config already resolved.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub key: CacheKey,
    /// Logical path the entry is indexed under.
    pub path: String,
    pub config: ResolvedCacheConfig,
    pub target: UpstreamTarget,
    pub method: Method,
    /// Headers forwarded upstream.
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

/// Response produced by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResponse {
    pub status: u16,
    /// Response headers with lowercase names, hop-by-hop removed.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub explain: CacheExplainHeaders,
    /// Whether a background refresh was scheduled by this request.
    pub refresh_scheduled: bool,
}

impl CacheResponse {
    fn from_upstream(resp: UpstreamResponse, explain: CacheExplainHeaders) -> Self {
        Self {
            status: resp.status,
            headers: forwardable_headers(&resp.headers),
            body: resp.body,
            explain,
            refresh_scheduled: false,
        }
    }

    fn from_entry(entry: CacheEntry, explain: CacheExplainHeaders) -> Self {
        let mut headers: Vec<(String, String)> = entry.headers.into_iter().collect();
        if let Some(etag) = entry.etag {
            headers.push(("etag".to_string(), etag));
        }
        if let Some(last_modified) = entry.last_modified {
            headers.push(("last-modified".to_string(), last_modified));
        }
        let body = match entry.data {
            crate::entry::EntryData::Text(text) => text.into_bytes(),
            crate::entry::EntryData::Bytes(bytes) => bytes,
        };
        Self {
            status: 200,
            headers,
            body,
            explain,
            refresh_scheduled: false,
        }
    }

    /// Cache status of this response.
    pub fn cache_status(&self) -> Option<CacheStatus> {
        self.explain.status
    }

    /// Response headers followed by the cache debug headers.
    pub fn all_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        headers.extend(self.explain.to_headers());
        headers
    }
}

/// The parts a background task needs; cloned into each refresh.
#[derive(Clone)]
pub(crate) struct Revalidator {
    pub(crate) entries: EntryStore,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) upstream: SharedUpstream,
    pub(crate) timeouts: FetchTimeouts,
    pub(crate) empty_response_ttl: u64,
}

impl Revalidator {
    /// Fetch from upstream and feed the outcome to the breaker.
    ///
    /// Non-2xx and transport failures both count as failures; `failure_key`
    /// names the entry to extend if that opens the breaker.
    pub(crate) async fn fetch(
        &self,
        request: &CacheRequest,
        purpose: FetchPurpose,
        failure_key: Option<&str>,
    ) -> Result<UpstreamResponse, FetchError> {
        let host = request.target.host.as_str();
        let outbound = UpstreamRequest::get(&request.target.url, self.timeouts.for_purpose(purpose))
            .with_method(request.method)
            .with_headers(request.headers.clone())
            .with_body(request.body.clone());

        match self.upstream.send(outbound).await {
            Ok(resp) if resp.is_success() => {
                self.breaker.record_success(host).await;
                Ok(resp)
            }
            Ok(resp) => {
                debug!(host, status = resp.status, purpose = purpose.name(), "upstream returned non-success");
                self.breaker.record_failure(host, failure_key).await;
                Ok(resp)
            }
            Err(e) => {
                warn!(host, error = %e, purpose = purpose.name(), "upstream fetch failed");
                self.breaker.record_failure(host, failure_key).await;
                Err(e)
            }
        }
    }

    /// Write a successful upstream response back. Non-UTF-8 bodies are not cached.
    pub(crate) async fn store(
        &self,
        key: &str,
        path: &str,
        config: &ResolvedCacheConfig,
        resp: &UpstreamResponse,
    ) -> bool {
        let Ok(text) = std::str::from_utf8(&resp.body) else {
            debug!(cache_key = key, "binary upstream body not cached");
            return false;
        };

        let mut headers = sanitize_headers(&resp.headers);
        let etag = headers.remove("etag");
        let last_modified = headers.remove("last-modified");
        let ttl = if text.is_empty() {
            EntryTtl::Exact(self.empty_response_ttl)
        } else {
            EntryTtl::Policy(config.ttl)
        };

        let entry = NewEntry::new(text, config.version, path)
            .with_headers(headers)
            .with_validators(etag, last_modified)
            .with_ttl(ttl);
        self.entries.save(key, entry).await
    }

    /// Background refresh of a stale entry. Always clears `lock_key`.
    async fn refresh(self, request: CacheRequest, lock_key: String) {
        let key = request.key.as_str();
        let host = request.target.host.as_str();

        let check = self.breaker.check(host).await;
        if check.should_break {
            info!(cache_key = key, host, "circuit open, extending stale entry");
            self.entries.extend_ttl(key, self.breaker.extension()).await;
        } else {
            match self.fetch(&request, FetchPurpose::Refresh, Some(key)).await {
                Ok(resp) if resp.is_success() => {
                    if self.store(key, &request.path, &request.config, &resp).await {
                        info!(cache_key = key, "stale entry refreshed");
                    }
                }
                Ok(resp) => {
                    debug!(cache_key = key, status = resp.status, "refresh kept stale entry");
                }
                Err(e) => {
                    debug!(cache_key = key, error = %e, "refresh failed, stale entry kept");
                }
            }
        }

        if let Err(e) = self.entries.kv().delete(&lock_key).await {
            warn!(cache_key = key, error = %e, "failed to clear update lock");
        }
    }
}

/// Decides HIT/MISS/STALE/BYPASS for each request and drives refreshes.
#[derive(Clone)]
pub struct CacheOrchestrator {
    pub(crate) inner: Revalidator,
    executor: SharedExecutor,
    update_lock_ttl: Duration,
}

impl std::fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("entries", &self.inner.entries)
            .field("breaker", &self.inner.breaker)
            .field("timeouts", &self.inner.timeouts)
            .field("update_lock_ttl", &self.update_lock_ttl)
            .finish()
    }
}

impl CacheOrchestrator {
    /// Wire the entry store, breaker and upstream from one config.
    ///
    /// Every fetch made through the orchestrator is bounded by the
    /// per-purpose timeout in `config.timeouts`.
    pub fn from_config(
        kv: SharedStore,
        clock: SharedClock,
        upstream: SharedUpstream,
        executor: SharedExecutor,
        config: &GatewayConfig,
    ) -> Self {
        let entries = EntryStore::new(kv, clock.clone(), &config.cache);
        let breaker = CircuitBreaker::new(entries.clone(), clock, &config.breaker);
        Self {
            inner: Revalidator {
                entries,
                breaker,
                upstream: enforce_deadlines(upstream),
                timeouts: FetchTimeouts::from(&config.timeouts),
                empty_response_ttl: config.cache.empty_response_ttl,
            },
            executor,
            update_lock_ttl: Duration::from_secs(config.cache.update_lock_ttl),
        }
    }

    pub fn entries(&self) -> &EntryStore {
        &self.inner.entries
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn executor(&self) -> &SharedExecutor {
        &self.executor
    }

    /// Serve `request` from cache or upstream.
    ///
    /// Only an upstream transport failure on the synchronous path is an
    /// error; non-2xx upstream answers pass through uncached.
    pub async fn handle(&self, request: CacheRequest) -> CacheResult<CacheResponse> {
        if !request.config.enabled {
            let resp = self
                .inner
                .fetch(&request, FetchPurpose::Miss, None)
                .await?;
            return Ok(CacheResponse::from_upstream(
                resp,
                CacheExplainHeaders::new(CacheStatus::Bypass),
            ));
        }

        let entries = &self.inner.entries;
        let key = request.key.as_str();
        let now = entries.now_ms();

        match entries.get(key).await {
            Some(entry) if entry.version == request.config.version && !entry.is_invalidated() => {
                let policy = entries.policy();
                let age_secs = entry.age_ms(now) / 1000;
                let ttl_secs = policy.expires_at(&entry).saturating_sub(now) / 1000;

                if !policy.is_expired(&entry, now) {
                    debug!(cache_key = key, age_secs, "cache hit");
                    entries.record_outcome(CacheStatus::Hit).await;
                    let explain = CacheExplainHeaders::new(CacheStatus::Hit)
                        .with_key(key)
                        .with_timing(age_secs, ttl_secs);
                    return Ok(CacheResponse::from_entry(entry, explain));
                }

                debug!(cache_key = key, age_secs, "serving stale entry");
                entries.record_outcome(CacheStatus::Stale).await;
                let scheduled = self.schedule_refresh(&request).await;
                let explain = CacheExplainHeaders::new(CacheStatus::Stale)
                    .with_key(key)
                    .with_timing(age_secs, 0);
                let mut response = CacheResponse::from_entry(entry, explain);
                response.refresh_scheduled = scheduled;
                Ok(response)
            }
            Some(entry) => {
                debug!(
                    cache_key = key,
                    stored_version = entry.version,
                    expected_version = request.config.version,
                    invalidated = entry.is_invalidated(),
                    "cached entry unusable"
                );
                self.miss(&request).await
            }
            None => self.miss(&request).await,
        }
    }

    async fn miss(&self, request: &CacheRequest) -> CacheResult<CacheResponse> {
        let key = request.key.as_str();
        self.inner.entries.record_outcome(CacheStatus::Miss).await;

        let resp = self
            .inner
            .fetch(request, FetchPurpose::Miss, None)
            .await?;
        if resp.is_success() && request.method.populates_cache() {
            self.inner
                .store(key, &request.path, &request.config, &resp)
                .await;
        }

        Ok(CacheResponse::from_upstream(
            resp,
            CacheExplainHeaders::new(CacheStatus::Miss).with_key(key),
        ))
    }

    /// Take the update lock and queue a refresh unless one is in flight.
    ///
    /// Check-then-set without compare-and-swap: a race can schedule two
    /// refreshes, which only costs an extra upstream call.
    async fn schedule_refresh(&self, request: &CacheRequest) -> bool {
        let key = request.key.as_str();
        let lock_key = request.key.update_lock();
        let kv = self.inner.entries.kv();

        match kv.get(&lock_key).await {
            Ok(Some(_)) => {
                debug!(cache_key = key, "refresh already in flight");
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(cache_key = key, error = %e, "update lock unreadable, not refreshing");
                return false;
            }
        }

        let stamp = self.inner.entries.now_ms().to_string();
        if let Err(e) = kv
            .put(&lock_key, stamp.as_bytes(), Some(self.update_lock_ttl))
            .await
        {
            warn!(cache_key = key, error = %e, "update lock not set, refreshing anyway");
        }

        let revalidator = self.inner.clone();
        let mut request = request.clone();
        if !request.method.populates_cache() {
            request.method = Method::Get;
        }
        self.executor
            .spawn(Box::pin(async move { revalidator.refresh(request, lock_key).await }));
        debug!(cache_key = key, "background refresh scheduled");
        true
    }
}
