//! Edge API gateway with response caching.
//!
//! This crate provides:
//! - `Gateway` - Routes requests to upstreams through the cache
//! - `GatewayResponse` - Runtime-neutral response
//! - Admin endpoints for invalidate, stats, preview, warm and delete
//! - The Spin HTTP component (on `wasm32`)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use edge_gateway::Gateway;
//!
//! let gateway = Gateway::new(config, Arc::new(store), Arc::new(SystemClock), upstream, executor);
//! let response = gateway.handle(GatewayRequest::new(Method::Get, "/api/products?page=2")).await;
//! ```

mod admin;
mod error;
mod handler;
mod response;

#[cfg(target_arch = "wasm32")]
mod spin;

pub use admin::{DeleteResponse, InvalidateRequest, InvalidateResponse, WarmRequest};
pub use error::*;
pub use handler::*;
pub use response::*;

#[cfg(target_arch = "wasm32")]
pub use spin::CONFIG_KEY;
