//! Durable key-value storage for the edge caching gateway.
//!
//! Every piece of shared state (cache entries, the path index, breaker
//! records, update locks) lives behind the [`KvStore`] trait. Two backends
//! are provided: [`MemoryStore`] for native runs and tests, and `SpinStore`
//! on `wasm32`.
//!
//! # Example
//!
//! ```rust,ignore
//! use edge_kv::{KvStore, MemoryStore};
//! use std::time::Duration;
//!
//! let store = MemoryStore::new();
//! store.put("lock", b"1", Some(Duration::from_secs(300))).await?;
//! let value = store.get("lock").await?;
//! ```

mod error;
mod memory;
#[cfg(target_arch = "wasm32")]
mod spin;
mod store;

pub use error::KvError;
pub use memory::MemoryStore;
#[cfg(target_arch = "wasm32")]
pub use spin::SpinStore;
pub use store::{get_json, put_json, KvStore, SharedStore};
