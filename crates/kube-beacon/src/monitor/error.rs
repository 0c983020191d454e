//! Check-in subsystem errors.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Informers did not deliver their initial list in time.
    #[error("informers not synced after {timeout:?}: {}", pending.join(", "))]
    SyncTimeout {
        timeout: Duration,
        pending: Vec<String>,
    },

    /// An informer stopped before its initial list completed.
    #[error("informer '{0}' stopped before syncing")]
    SyncFailed(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
