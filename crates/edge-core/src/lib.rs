//! Core types for the edge caching gateway.
//!
//! This crate provides:
//! - `GatewayConfig` - Cache, breaker, timeout and route configuration
//! - `ConfigResolver` - Path > route > global cache config inheritance
//! - `RouteTable` - Longest-prefix upstream routing
//! - `GatewayRequest` - Inbound request model
//! - `Clock` - Injectable wall clock

mod clock;
mod config;
mod context;
mod platform;
mod resolve;

pub use clock::*;
pub use config::*;
pub use context::*;
pub use platform::*;
pub use resolve::*;
