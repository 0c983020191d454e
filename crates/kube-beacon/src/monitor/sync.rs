//! Initial-sync tracking for informers.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use super::error::{MonitorError, Result};

/// Held by an informer; flipped once its initial list has been delivered.
///
/// Dropping it unsynced tells waiters the informer stopped.
pub struct SyncSignal {
    name: String,
    tx: watch::Sender<bool>,
}

impl SyncSignal {
    pub fn mark_synced(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_synced(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waiter for another task that must not start before this informer syncs.
    pub fn waiter(&self) -> SyncWaiter {
        SyncWaiter {
            name: self.name.clone(),
            rx: self.tx.subscribe(),
        }
    }
}

/// Waits for one [`SyncSignal`].
#[derive(Clone)]
pub struct SyncWaiter {
    name: String,
    rx: watch::Receiver<bool>,
}

impl SyncWaiter {
    pub fn is_synced(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&mut self) -> Result<()> {
        self.rx
            .wait_for(|synced| *synced)
            .await
            .map(|_| ())
            .map_err(|_| MonitorError::SyncFailed(self.name.clone()))
    }
}

/// Every informer registered for the process. Backs `/readyz` and the
/// startup sync deadline.
#[derive(Clone, Default)]
pub struct SyncGroup {
    waiters: Arc<Mutex<Vec<SyncWaiter>>>,
}

impl SyncGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>) -> SyncSignal {
        let (tx, rx) = watch::channel(false);
        let name = name.into();
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SyncWaiter {
                name: name.clone(),
                rx,
            });
        SyncSignal { name, tx }
    }

    /// True when every registered informer has synced (vacuously true when
    /// none are registered).
    pub fn all_synced(&self) -> bool {
        self.snapshot().iter().all(SyncWaiter::is_synced)
    }

    /// Names of informers still listing.
    pub fn pending(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|w| !w.is_synced())
            .map(|w| w.name)
            .collect()
    }

    /// Wait until every informer synced, failing after `timeout`.
    pub async fn wait_all(&self, timeout: Duration) -> Result<()> {
        let waiters = self.snapshot();
        let wait = async {
            for mut waiter in waiters {
                waiter.wait().await?;
            }
            Ok(())
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::SyncTimeout {
                timeout,
                pending: self.pending(),
            }),
        }
    }

    fn snapshot(&self) -> Vec<SyncWaiter> {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
