//! Response caching and upstream resilience for the edge gateway.
//!
//! This crate provides:
//! - `CacheKeyBuilder` / `derive_request_key` - Deterministic cache key derivation
//! - `TtlPolicy` - TTL defaults, ceiling, jitter and expiry
//! - `EntryStore` - Entry persistence, compression, path index and invalidation
//! - `CircuitBreaker` - Per-host breaker that extends stale entries when open
//! - `CacheOrchestrator` - HIT/MISS/STALE/BYPASS decisions with background refresh
//! - `CacheExplainHeaders` - Debug headers for cache behavior
//!
//! # Example
//!
//! ```ignore
//! use edge_cache::{derive_request_key, CacheOrchestrator, CacheRequest};
//!
//! let key = derive_request_key(&request, &config);
//! let response = orchestrator
//!     .handle(CacheRequest { key, path: path.into(), config, target, method, headers, body })
//!     .await?;
//! ```

mod breaker;
mod compression;
mod entry;
mod error;
mod headers;
mod index;
mod key;
mod policy;
mod revalidate;
mod stats;
mod status;
mod store;
mod warm;

pub use breaker::*;
pub use compression::*;
pub use entry::*;
pub use error::*;
pub use headers::*;
pub use index::*;
pub use key::*;
pub use policy::*;
pub use revalidate::*;
pub use stats::*;
pub use status::*;
pub use store::*;
pub use warm::*;
