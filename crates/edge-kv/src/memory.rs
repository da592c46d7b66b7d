//! In-process store for native runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use edge_core::{SharedClock, SystemClock};

use crate::{KvError, KvStore};

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at_ms: Option<u64>,
}

#[derive(Default)]
struct Faults {
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

/// In-memory [`KvStore`] honouring per-key expiration against a [`Clock`].
///
/// Clones share the same data. Reads and writes can be made to fail for
/// exercising degraded paths.
///
/// [`Clock`]: edge_core::Clock
#[derive(Clone)]
pub struct MemoryStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    clock: SharedClock,
    faults: Arc<Faults>,
}

impl MemoryStore {
    /// Create a store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            clock,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Make every subsequent read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write and delete fail.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.faults.writes.load(Ordering::SeqCst)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.slots()
            .values()
            .filter(|slot| is_live(slot, now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // A panic while holding the lock leaves the map itself intact.
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_read(&self) -> Result<(), KvError> {
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(KvError::Backend("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), KvError> {
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(KvError::Backend("injected write failure".into()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.slots().len())
            .finish()
    }
}

fn is_live(slot: &Slot, now_ms: u64) -> bool {
    slot.expires_at_ms.map_or(true, |at| now_ms < at)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.check_read()?;
        let now = self.clock.now_ms();
        let mut slots = self.slots();
        match slots.get(key) {
            Some(slot) if is_live(slot, now) => Ok(Some(slot.value.clone())),
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> Result<(), KvError> {
        self.check_write()?;
        let expires_at_ms = expires_in.map(|d| self.clock.now_ms() + d.as_millis() as u64);
        self.slots().insert(
            key.to_string(),
            Slot {
                value: value.to_vec(),
                expires_at_ms,
            },
        );
        self.faults.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.check_write()?;
        self.slots().remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        self.check_read()?;
        let now = self.clock.now_ms();
        let mut keys: Vec<String> = self
            .slots()
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && is_live(slot, now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
