use std::time::Duration;

use async_trait::async_trait;
use kube_beacon_protocol::{Alert, CheckIn, CheckInId};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{Backend, BackendError, Result};

/// JSON-over-HTTP backend.
///
/// - `POST {base}/api/alerts`
/// - `POST {base}/api/monitors/{slug}/checkins`
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct CheckInResponse {
    #[serde(default)]
    id: Option<CheckInId>,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kube-beacon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            token,
        })
    }

    fn post<T: serde::Serialize + ?Sized>(&self, url: &str, body: &T) -> reqwest::RequestBuilder {
        let builder = self.client.post(url).json(body);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let response = self.post(url, body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, message });
        }
        Ok(response)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn submit_alert(&self, alert: &Alert) -> Result<()> {
        let url = format!("{}/api/alerts", self.base_url);
        self.send(&url, alert).await?;
        debug!(url = %url, "Alert delivered");
        Ok(())
    }

    async fn submit_checkin(&self, checkin: &CheckIn) -> Result<CheckInId> {
        let url = format!(
            "{}/api/monitors/{}/checkins",
            self.base_url, checkin.monitor_slug
        );
        let response = self.send(&url, checkin).await?;

        // The backend may echo an id of its own; otherwise ours stands.
        let id = response
            .json::<CheckInResponse>()
            .await
            .ok()
            .and_then(|r| r.id)
            .unwrap_or(checkin.check_in_id);
        Ok(id)
    }
}
