//! Background execution for work that outlives a request.
//!
//! This crate provides:
//! - `BackgroundExecutor` - Submit-and-track seam
//! - `DeferredExecutor` - Runs queued tasks after the response is sent
//! - `TokioExecutor` - Spawns onto tokio and awaits in-flight tasks on drain

mod background;

pub use background::*;
