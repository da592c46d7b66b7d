//! The key-value store seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::KvError;

/// Durable key-value store shared by every execution context.
///
/// There is no compare-and-swap: concurrent writers to the same key race and
/// the last write wins. Expired keys read as absent.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a raw value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Write a raw value, optionally expiring after `expires_in`.
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        expires_in: Option<Duration>,
    ) -> Result<(), KvError>;

    /// Delete a key. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// List live keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn KvStore>;

/// Read and deserialize a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, KvError> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serialize and write a JSON value.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    expires_in: Option<Duration>,
) -> Result<(), KvError> {
    let bytes = serde_json::to_vec(value)?;
    store.put(key, &bytes, expires_in).await
}
