use async_trait::async_trait;
use kube_beacon_protocol::{Alert, CheckIn, CheckInId};
use tracing::info;

use super::{Backend, Result};

/// Writes alerts and check-ins to the log instead of sending them anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBackend;

#[async_trait]
impl Backend for LogBackend {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn submit_alert(&self, alert: &Alert) -> Result<()> {
        info!(
            level = ?alert.level,
            fingerprint = ?alert.fingerprint,
            tags = ?alert.tags,
            breadcrumbs = alert.breadcrumbs.len(),
            "Alert: {}",
            alert.message
        );
        Ok(())
    }

    async fn submit_checkin(&self, checkin: &CheckIn) -> Result<CheckInId> {
        info!(
            monitor = %checkin.monitor_slug,
            status = %checkin.status,
            check_in_id = %checkin.check_in_id,
            duration = ?checkin.duration,
            "Check-in"
        );
        Ok(checkin.check_in_id)
    }
}
