//! Per-upstream-host circuit breaker persisted in the shared store.
//!
//! ```text
//! CLOSED --(failures >= threshold)--> OPEN --(timeout elapsed, on check)--> HALF_OPEN
//!   ^                                   ^                                     |
//!   |                                   +-------------(failure)---------------+
//!   +---------------------------(success, from any state)---------------------+
//! ```

use std::time::Duration;

use edge_core::{BreakerSettings, SharedClock};
use edge_kv::{get_json, put_json, SharedStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::EntryStore;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Persisted breaker record for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerRecord {
    pub state: BreakerState,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_time: Option<u64>,
}

/// Outcome of [`CircuitBreaker::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerCheck {
    /// Whether the caller must not contact the host.
    pub should_break: bool,
    pub state: BreakerState,
}

/// Store key of the record for `host`.
pub fn breaker_key(host: &str) -> String {
    format!("circuit:{}", host)
}

/// Three-state breaker keyed by upstream host.
///
/// Every method reads the record fresh from the store; no state is kept in
/// process. Store faults read as CLOSED and drop writes.
#[derive(Clone)]
pub struct CircuitBreaker {
    kv: SharedStore,
    clock: SharedClock,
    entries: EntryStore,
    threshold: u32,
    timeout: Duration,
    extension: Duration,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("threshold", &self.threshold)
            .field("timeout", &self.timeout)
            .field("extension", &self.extension)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker sharing `entries`' store and clock.
    pub fn new(entries: EntryStore, clock: SharedClock, settings: &BreakerSettings) -> Self {
        Self {
            kv: entries.kv().clone(),
            clock,
            entries,
            threshold: settings.failure_threshold,
            timeout: Duration::from_secs(settings.timeout_secs),
            extension: Duration::from_secs(settings.extension_secs),
        }
    }

    /// How far entries are extended when the breaker denies traffic.
    pub fn extension(&self) -> Duration {
        self.extension
    }

    /// Current record for `host`, CLOSED when absent.
    pub async fn record(&self, host: &str) -> BreakerRecord {
        match get_json::<BreakerRecord>(self.kv.as_ref(), &breaker_key(host)).await {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                warn!(host, error = %e, "breaker state unreadable, assuming closed");
                BreakerRecord::default()
            }
        }
    }

    async fn persist(&self, host: &str, record: &BreakerRecord) {
        let expires_in = self.timeout * 2;
        if let Err(e) = put_json(self.kv.as_ref(), &breaker_key(host), record, Some(expires_in)).await
        {
            warn!(host, error = %e, "breaker state write failed");
        }
    }

    /// Whether traffic to `host` must be held back.
    ///
    /// Moves OPEN to HALF_OPEN once the timeout has elapsed. HALF_OPEN is
    /// advisory, like the update lock: without compare-and-swap every
    /// caller that reads it is let through, and the first recorded outcome
    /// decides between CLOSED and a fresh OPEN window.
    pub async fn check(&self, host: &str) -> BreakerCheck {
        let mut record = self.record(host).await;
        let now = self.clock.now_ms();

        match record.state {
            BreakerState::Closed | BreakerState::HalfOpen => BreakerCheck {
                should_break: false,
                state: record.state,
            },
            BreakerState::Open => {
                let ready = record.next_attempt_time.map_or(true, |at| now >= at);
                if !ready {
                    return BreakerCheck {
                        should_break: true,
                        state: BreakerState::Open,
                    };
                }
                record.state = BreakerState::HalfOpen;
                self.persist(host, &record).await;
                info!(host, "circuit half-open, admitting request");
                BreakerCheck {
                    should_break: false,
                    state: BreakerState::HalfOpen,
                }
            }
        }
    }

    /// Count a failure against `host`.
    ///
    /// When the breaker ends up OPEN and `cache_key` is given, that entry's
    /// lifetime is extended so the stale copy keeps being served.
    pub async fn record_failure(&self, host: &str, cache_key: Option<&str>) -> BreakerState {
        let mut record = self.record(host).await;
        let now = self.clock.now_ms();

        record.failure_count = record.failure_count.saturating_add(1);
        record.last_failure_time = Some(now);

        let opens = match record.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => record.failure_count >= self.threshold,
            BreakerState::Open => false,
        };
        if opens {
            record.state = BreakerState::Open;
            record.next_attempt_time = Some(now + self.timeout.as_millis() as u64);
            warn!(
                host,
                failures = record.failure_count,
                retry_in_secs = self.timeout.as_secs(),
                "circuit opened"
            );
        } else {
            debug!(host, failures = record.failure_count, state = %record.state, "upstream failure recorded");
        }
        self.persist(host, &record).await;

        if record.state == BreakerState::Open {
            if let Some(key) = cache_key {
                self.entries.extend_ttl(key, self.extension).await;
            }
        }
        record.state
    }

    /// Reset `host` to CLOSED.
    pub async fn record_success(&self, host: &str) {
        self.persist(host, &BreakerRecord::default()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheKeyBuilder;
    use crate::store::{EntryTtl, NewEntry};
    use edge_core::{CacheSettings, Clock, ManualClock};
    use edge_kv::{KvStore, MemoryStore};
    use std::sync::Arc;

    const HOST: &str = "api.internal";

    fn setup() -> (CircuitBreaker, EntryStore, MemoryStore, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let kv = MemoryStore::with_clock(Arc::new(clock.clone()));
        let entries = EntryStore::new(
            Arc::new(kv.clone()),
            Arc::new(clock.clone()),
            &CacheSettings::default(),
        );
        let breaker = CircuitBreaker::new(
            entries.clone(),
            Arc::new(clock.clone()),
            &BreakerSettings::default(),
        );
        (breaker, entries, kv, clock)
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let (breaker, _, _, _) = setup();
        for _ in 0..4 {
            assert_eq!(breaker.record_failure(HOST, None).await, BreakerState::Closed);
            assert!(!breaker.check(HOST).await.should_break);
        }
        assert_eq!(breaker.record_failure(HOST, None).await, BreakerState::Open);

        let check = breaker.check(HOST).await;
        assert!(check.should_break);
        assert_eq!(check.state, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout() {
        let (breaker, _, _, clock) = setup();
        for _ in 0..5 {
            breaker.record_failure(HOST, None).await;
        }
        clock.advance(Duration::from_secs(59));
        assert!(breaker.check(HOST).await.should_break);

        clock.advance(Duration::from_secs(1));
        let check = breaker.check(HOST).await;
        assert!(!check.should_break);
        assert_eq!(check.state, BreakerState::HalfOpen);
        assert_eq!(breaker.record(HOST).await.state, BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_admits_concurrent_callers_until_an_outcome() {
        let (breaker, _, _, clock) = setup();
        for _ in 0..5 {
            breaker.record_failure(HOST, None).await;
        }
        clock.advance(Duration::from_secs(60));

        let first = breaker.check(HOST).await;
        let second = breaker.check(HOST).await;
        assert!(!first.should_break);
        assert!(!second.should_break);
        assert_eq!(second.state, BreakerState::HalfOpen);

        breaker.record_failure(HOST, None).await;
        assert!(breaker.check(HOST).await.should_break);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let (breaker, _, _, clock) = setup();
        for _ in 0..5 {
            breaker.record_failure(HOST, None).await;
        }
        clock.advance(Duration::from_secs(60));
        breaker.check(HOST).await;

        assert_eq!(breaker.record_failure(HOST, None).await, BreakerState::Open);
        let record = breaker.record(HOST).await;
        assert_eq!(record.next_attempt_time, Some(clock.now_ms() + 60_000));
        assert!(breaker.check(HOST).await.should_break);
    }

    #[tokio::test]
    async fn test_success_resets_from_any_state() {
        let (breaker, _, _, _) = setup();
        for _ in 0..5 {
            breaker.record_failure(HOST, None).await;
        }
        breaker.record_success(HOST).await;
        let record = breaker.record(HOST).await;
        assert_eq!(record.state, BreakerState::Closed);
        assert_eq!(record.failure_count, 0);

        for _ in 0..4 {
            breaker.record_failure(HOST, None).await;
        }
        assert!(!breaker.check(HOST).await.should_break);
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        let (breaker, _, _, _) = setup();
        for _ in 0..5 {
            breaker.record_failure(HOST, None).await;
        }
        assert!(!breaker.check("other.internal").await.should_break);
    }

    #[tokio::test]
    async fn test_record_self_expires() {
        let (breaker, _, kv, clock) = setup();
        breaker.record_failure(HOST, None).await;
        assert!(kv.get(&breaker_key(HOST)).await.unwrap().is_some());
        clock.advance(Duration::from_secs(120));
        assert!(kv.get(&breaker_key(HOST)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_opening_extends_entry() {
        let (breaker, entries, _, clock) = setup();
        let key = CacheKeyBuilder::new("/p", 1).build().to_string();
        entries
            .save(&key, NewEntry::new("cached", 1, "/p").with_ttl(EntryTtl::Exact(60)))
            .await;

        for _ in 0..4 {
            breaker.record_failure(HOST, Some(&key)).await;
        }
        let before = entries.get(&key).await.unwrap();
        assert_eq!(before.circuit_breaker_extended, None);

        breaker.record_failure(HOST, Some(&key)).await;
        let after = entries.get(&key).await.unwrap();
        assert_eq!(after.circuit_breaker_extended, Some(true));
        assert_eq!(
            after.expires_at,
            Some(before.expires_at.unwrap() + 3_600_000)
        );
        assert_eq!(after.circuit_breaker_extended_at, Some(clock.now_ms()));
    }

    #[tokio::test]
    async fn test_store_fault_reads_closed() {
        let (breaker, _, kv, _) = setup();
        kv.fail_reads(true);
        let check = breaker.check(HOST).await;
        assert!(!check.should_break);
        assert_eq!(check.state, BreakerState::Closed);
    }

    #[test]
    fn test_wire_shape() {
        let record = BreakerRecord {
            state: BreakerState::HalfOpen,
            failure_count: 5,
            last_failure_time: Some(1),
            next_attempt_time: Some(2),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "HALF_OPEN");
        assert_eq!(json["failureCount"], 5);
        assert_eq!(json["nextAttemptTime"], 2);
    }
}
