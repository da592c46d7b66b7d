//! Spin key-value store backend.
//!
//! Spin's store has no native expiration, so every value is wrapped in a
//! small JSON envelope carrying its deadline. Expired envelopes are removed
//! lazily on read.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use edge_core::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use spin_sdk::key_value::Store;
use tracing::warn;

use crate::{KvError, KvStore};

#[derive(Serialize, Deserialize)]
struct Envelope {
    /// Base64 encoded value.
    v: String,
    /// Expiry in ms since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
}

/// [`KvStore`] over a Spin key-value store label.
///
/// The store is opened per call; Spin store handles are not `Send`.
#[derive(Debug, Clone)]
pub struct SpinStore {
    label: Option<String>,
}

impl SpinStore {
    /// Use the component's default store.
    pub fn open_default() -> Self {
        Self { label: None }
    }

    /// Use a named store.
    pub fn open(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    fn store(&self) -> Result<Store, KvError> {
        let opened = match &self.label {
            Some(label) => Store::open(label),
            None => Store::open_default(),
        };
        opened.map_err(|e| KvError::Open(e.to_string()))
    }

    fn read_live(store: &Store, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let Some(raw) = store
            .get(key)
            .map_err(|e| KvError::Backend(e.to_string()))?
        else {
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_slice(&raw)?;
        if envelope.exp.is_some_and(|exp| SystemClock.now_ms() >= exp) {
            if let Err(e) = store.delete(key) {
                warn!(key, error = %e, "failed to remove expired key");
            }
            return Ok(None);
        }

        STANDARD
            .decode(envelope.v)
            .map(Some)
            .map_err(|e| KvError::Backend(format!("corrupt envelope for {}: {}", key, e)))
    }
}

#[async_trait]
impl KvStore for SpinStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let store = self.store()?;
        Self::read_live(&store, key)
    }

    async fn put(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> Result<(), KvError> {
        let envelope = Envelope {
            v: STANDARD.encode(value),
            exp: expires_in.map(|d| SystemClock.now_ms() + d.as_millis() as u64),
        };
        let bytes = serde_json::to_vec(&envelope)?;
        self.store()?
            .set(key, &bytes)
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.store()?
            .delete(key)
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let store = self.store()?;
        let keys = store
            .get_keys()
            .map_err(|e| KvError::Backend(e.to_string()))?;

        let mut live = Vec::new();
        for key in keys.into_iter().filter(|k| k.starts_with(prefix)) {
            if Self::read_live(&store, &key)?.is_some() {
                live.push(key);
            }
        }
        Ok(live)
    }
}
