//! Target-dependent thread-safety bounds.
//!
//! Spin components run single-threaded on `wasm32`, and the host types they
//! hold are not `Send`. Native builds run on a multi-threaded tokio runtime.
//! Traits that sit on both sides use `MaybeShared` as their supertrait.

/// `Send + Sync` on native targets, no bound on `wasm32`.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeShared: Send + Sync {}

#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync + ?Sized> MaybeShared for T {}

/// `Send + Sync` on native targets, no bound on `wasm32`.
#[cfg(target_arch = "wasm32")]
pub trait MaybeShared {}

#[cfg(target_arch = "wasm32")]
impl<T: ?Sized> MaybeShared for T {}
