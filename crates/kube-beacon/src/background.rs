//! Registry of long-lived tasks (watchers, informers, health server).
//!
//! Every task is expected to watch the shared cancellation token and return
//! once it fires. `shutdown` then awaits all of them.

// std::sync::Mutex is fine here: the lock is never held across an await.
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ============================================================================
// BackgroundTasks
// ============================================================================

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<(String, JoinHandle<()>)>>>,
    cancel: CancellationToken,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown). Clone it into tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a named task and register its handle before returning.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);

        let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|(_, h)| !h.is_finished());
        guard.push((name.into(), handle));
    }

    /// Cancel the token and wait for every registered task.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handles: Vec<_> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "Waiting for background tasks to stop");
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                warn!(task = %name, error = %e, "Background task panicked");
            }
        }
        info!("All background tasks stopped");
    }

    /// Number of tasks still running.
    pub fn pending_count(&self) -> usize {
        let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|(_, h)| !h.is_finished());
        guard.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
