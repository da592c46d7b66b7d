//! Upstream access for the edge caching gateway.
//!
//! This crate provides:
//! - `Upstream` - The fetch seam (method, URL, headers, body, deadline)
//! - `FetchTimeouts` - Per-purpose deadlines for miss, refresh and warm
//! - `TimeoutUpstream` - Deadline enforcement on native targets
//! - `SpinUpstream` - Outbound `wasi:http` with host-enforced deadlines
//! - `MockUpstream` - Scripted upstream for tests

mod client;
#[cfg(not(target_arch = "wasm32"))]
mod mock;
#[cfg(target_arch = "wasm32")]
mod spin;
mod timeout;

pub use client::*;
#[cfg(not(target_arch = "wasm32"))]
pub use mock::MockUpstream;
#[cfg(target_arch = "wasm32")]
pub use spin::SpinUpstream;
pub use timeout::*;
