//! Delivery of alerts and check-ins to the monitoring backend.
//!
//! The core only sees the [`Backend`] trait. Delivery failures are reported
//! back to the caller, which logs them; nothing here retries.

mod error;
mod http;
mod log;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube_beacon_protocol::{Alert, CheckIn, CheckInId};

use crate::config::BackendConfig;

pub use error::{BackendError, Result};
pub use http::HttpBackend;
pub use log::LogBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name for logs and `doctor`.
    fn name(&self) -> &'static str;

    async fn submit_alert(&self, alert: &Alert) -> Result<()>;

    /// Submit a check-in and return the identifier the backend recorded it
    /// under. Terminal check-ins must reuse the identifier of their start.
    async fn submit_checkin(&self, checkin: &CheckIn) -> Result<CheckInId>;
}

/// Build the backend selected by configuration. No URL means log-only.
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match config.url.as_deref() {
        Some(url) => {
            let backend = HttpBackend::new(
                url,
                config.token.clone(),
                Duration::from_secs(config.timeout_seconds),
            )?;
            Ok(Arc::new(backend))
        }
        None => Ok(Arc::new(LogBackend)),
    }
}
