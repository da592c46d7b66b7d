//! Background task execution.
//!
//! Work such as a stale-while-revalidate refresh must outlive the response
//! that triggered it, yet still be tracked to completion. Handlers submit a
//! [`BackgroundTask`] and the hosting runtime calls [`BackgroundExecutor::drain`]
//! once the response has been sent (or on shutdown).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use edge_core::MaybeShared;
use tracing::debug;

/// A unit of fire-and-forget work.
#[cfg(not(target_arch = "wasm32"))]
pub type BackgroundTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A unit of fire-and-forget work.
#[cfg(target_arch = "wasm32")]
pub type BackgroundTask = Pin<Box<dyn Future<Output = ()> + 'static>>;

/// Runs work decoupled from the request that scheduled it.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait BackgroundExecutor: MaybeShared {
    /// Submit a task. Never blocks on the task itself.
    fn spawn(&self, task: BackgroundTask);

    /// Wait until every submitted task, including tasks submitted while
    /// draining, has finished.
    async fn drain(&self);

    /// Number of tasks submitted but not yet finished.
    fn pending(&self) -> usize;
}

/// Shared executor handle.
pub type SharedExecutor = Arc<dyn BackgroundExecutor>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Queues tasks and runs them only when drained.
///
/// Suits runtimes without a background scheduler: the component sends its
/// response first, then drains.
#[derive(Default)]
pub struct DeferredExecutor {
    queue: Mutex<Vec<BackgroundTask>>,
}

impl DeferredExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for DeferredExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl BackgroundExecutor for DeferredExecutor {
    fn spawn(&self, task: BackgroundTask) {
        lock(&self.queue).push(task);
    }

    async fn drain(&self) {
        loop {
            let batch = std::mem::take(&mut *lock(&self.queue));
            if batch.is_empty() {
                break;
            }
            debug!(tasks = batch.len(), "draining deferred tasks");
            futures::future::join_all(batch).await;
        }
    }

    fn pending(&self) -> usize {
        lock(&self.queue).len()
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::TokioExecutor;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::task::JoinHandle;
    use tracing::{error, warn};

    use super::{lock, BackgroundExecutor, BackgroundTask};

    /// Spawns tasks onto the current tokio runtime and keeps their handles.
    ///
    /// Tasks submitted outside a runtime are held and run by the next
    /// `drain`.
    #[derive(Default)]
    pub struct TokioExecutor {
        handles: Mutex<Vec<JoinHandle<()>>>,
        held: Mutex<Vec<BackgroundTask>>,
    }

    impl TokioExecutor {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl std::fmt::Debug for TokioExecutor {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TokioExecutor")
                .field("pending", &self.pending())
                .finish()
        }
    }

    #[async_trait]
    impl BackgroundExecutor for TokioExecutor {
        fn spawn(&self, task: BackgroundTask) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let mut handles = lock(&self.handles);
                    handles.retain(|h| !h.is_finished());
                    handles.push(handle.spawn(task));
                }
                Err(_) => {
                    warn!("no tokio runtime, holding background task until drain");
                    lock(&self.held).push(task);
                }
            }
        }

        async fn drain(&self) {
            loop {
                let held = std::mem::take(&mut *lock(&self.held));
                if !held.is_empty() {
                    let mut handles = lock(&self.handles);
                    handles.extend(held.into_iter().map(tokio::spawn));
                }

                let batch = std::mem::take(&mut *lock(&self.handles));
                if batch.is_empty() {
                    break;
                }
                for handle in batch {
                    if let Err(e) = handle.await {
                        error!(error = %e, "background task failed");
                    }
                }
            }
        }

        fn pending(&self) -> usize {
            let running = lock(&self.handles)
                .iter()
                .filter(|h| !h.is_finished())
                .count();
            running + lock(&self.held).len()
        }
    }
}
