//! TTL policy: defaults, hard ceiling, jitter and expiry.

use edge_core::CacheSettings;
use rand::Rng;
use tracing::warn;

use crate::entry::CacheEntry;

/// Lower bound of a randomized TTL as a fraction of the base TTL.
///
/// Fixed regardless of the configured variance.
const JITTER_FLOOR: f64 = 0.5;

/// Computes entry lifetimes and decides expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlPolicy {
    /// Fallback TTL in seconds.
    pub default_ttl: u64,
    /// Hard ceiling in seconds; also the absolute maximum entry age.
    pub max_ttl: u64,
    /// Jitter as a fraction of the TTL.
    pub variance: f64,
}

impl TtlPolicy {
    pub fn new(default_ttl: u64, max_ttl: u64, variance: f64) -> Self {
        Self {
            default_ttl,
            max_ttl,
            variance,
        }
    }

    /// Explicit TTL or the default, clamped to the ceiling.
    pub fn effective_ttl(&self, explicit: Option<u64>) -> u64 {
        let ttl = explicit.unwrap_or(self.default_ttl);
        if ttl > self.max_ttl {
            warn!(ttl, max_ttl = self.max_ttl, "ttl exceeds maximum, clamping");
            return self.max_ttl;
        }
        ttl
    }

    /// Jitter `ttl` by up to ±variance using `rng`.
    ///
    /// Never below half of `ttl`, never above the ceiling, and `0` stays `0`.
    pub fn randomize_with<R: Rng + ?Sized>(&self, ttl: u64, rng: &mut R) -> u64 {
        if ttl == 0 {
            return 0;
        }
        let base = ttl as f64;
        let offset = base * self.variance;
        let jitter = if offset > 0.0 {
            rng.gen_range(-offset..=offset)
        } else {
            0.0
        };
        let randomized = (base + jitter).max(base * JITTER_FLOOR).floor() as u64;
        randomized.min(self.max_ttl)
    }

    /// Jitter `ttl` with the thread-local RNG.
    pub fn randomize(&self, ttl: u64) -> u64 {
        self.randomize_with(ttl, &mut rand::thread_rng())
    }

    /// The TTL to write: effective, then randomized, then re-clamped.
    pub fn compute(&self, explicit: Option<u64>) -> u64 {
        self.randomize(self.effective_ttl(explicit))
    }

    /// Whether an entry's age exceeds the absolute maximum.
    pub fn is_past_hard_max(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        now_ms.saturating_sub(entry.created_at) > self.max_ttl * 1000
    }

    /// Expiry timestamp, treating legacy entries without one as default-TTL.
    pub fn expires_at(&self, entry: &CacheEntry) -> u64 {
        entry
            .expires_at
            .unwrap_or(entry.created_at + self.default_ttl * 1000)
    }

    /// Whether the entry is expired at `now_ms`.
    pub fn is_expired(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        self.is_past_hard_max(entry, now_ms) || now_ms > self.expires_at(entry)
    }
}

impl From<&CacheSettings> for TtlPolicy {
    fn from(settings: &CacheSettings) -> Self {
        Self::new(settings.default_ttl, settings.max_ttl, settings.ttl_variance)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}
