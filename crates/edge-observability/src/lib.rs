//! Observability for the edge caching gateway.
//!
//! This crate provides:
//! - `init_tracing` - Installs the structured `tracing` subscriber
//! - `RequestMetrics` - Per-request accumulator emitted as one event

mod logging;
mod metrics;

pub use logging::*;
pub use metrics::*;

// Re-export RequestId from edge-core for convenience
pub use edge_core::RequestId;
