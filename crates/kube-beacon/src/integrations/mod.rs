//! Optional integrations that add cluster metadata to every alert.
//!
//! The set is closed: adding one means adding an [`Integration`] variant.

pub mod gke;

use std::time::Duration;

use thiserror::Error;
use tracing::{Instrument, info, info_span, warn};

use crate::config::IntegrationsConfig;
use crate::scope::GlobalScope;

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("cannot fetch metadata: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("metadata server answered {status} for {url}")]
    Status { url: String, status: u16 },
}

pub type Result<T> = std::result::Result<T, IntegrationError>;

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integration {
    Gke,
}

impl Integration {
    pub const ALL: [Integration; 1] = [Integration::Gke];

    pub fn name(self) -> &'static str {
        match self {
            Integration::Gke => "gke",
        }
    }

    pub fn is_enabled(self, config: &IntegrationsConfig) -> bool {
        match self {
            Integration::Gke => config.gke.enabled,
        }
    }

    /// Resolve the integration's metadata into `scope`.
    pub async fn apply(self, http: &reqwest::Client, scope: &mut GlobalScope) -> Result<()> {
        match self {
            Integration::Gke => {
                let metadata = gke::fetch(http, gke::METADATA_BASE_URL).await?;
                info!(
                    cluster = %metadata.cluster_name,
                    location = %metadata.cluster_location,
                    project = %metadata.project_id,
                    "GKE context discovered"
                );
                metadata.apply_to(scope);
                Ok(())
            }
        }
    }
}

/// HTTP client used to query metadata servers.
pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(METADATA_TIMEOUT).build()?)
}

/// Run every enabled integration. Failures are logged and skipped.
pub async fn apply_enabled(config: &IntegrationsConfig, scope: &mut GlobalScope) {
    let enabled: Vec<_> = Integration::ALL
        .into_iter()
        .filter(|i| i.is_enabled(config))
        .collect();
    if enabled.is_empty() {
        return;
    }

    let http = match http_client() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Cannot build HTTP client for integrations");
            return;
        }
    };

    for integration in enabled {
        let span = info_span!("integration", name = integration.name());
        async {
            info!("Running integration");
            if let Err(e) = integration.apply(&http, scope).await {
                warn!(error = %e, "Integration failed, skipping");
            }
        }
        .instrument(span)
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GkeConfig;

    #[test]
    fn gke_follows_config_flag() {
        let mut config = IntegrationsConfig::default();
        assert!(!Integration::Gke.is_enabled(&config));

        config.gke = GkeConfig { enabled: true };
        assert!(Integration::Gke.is_enabled(&config));
    }

    #[tokio::test]
    async fn nothing_enabled_leaves_scope_untouched() {
        let mut scope = GlobalScope::default();
        apply_enabled(&IntegrationsConfig::default(), &mut scope).await;
        assert!(scope.tags.is_empty());
        assert!(scope.gke.is_none());
    }
}
