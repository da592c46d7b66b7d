//! Cache error types.

use edge_data::FetchError;
use edge_kv::KvError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache operation errors.
///
/// Storage faults are absorbed by the entry store's public API; only
/// upstream faults on the synchronous miss path reach request handling.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Backend storage error.
    #[error("storage error: {0}")]
    Storage(#[from] KvError),

    /// Failed to serialize/deserialize a record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed cache key string.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// Invalidation pattern could not be compiled.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Upstream fetch failed.
    #[error("upstream error: {0}")]
    Upstream(#[from] FetchError),
}
