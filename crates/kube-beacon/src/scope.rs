//! Process-wide alert annotations resolved once at startup.

use std::collections::BTreeMap;

use kube_beacon_protocol::{Alert, Context};
use serde_json::json;

use crate::integrations::gke::GkeMetadata;

pub const KUBERNETES_CONTEXT: &str = "Kubernetes";

/// Tags and contexts merged into every alert.
#[derive(Debug, Clone, Default)]
pub struct GlobalScope {
    pub tags: BTreeMap<String, String>,
    pub contexts: BTreeMap<String, Context>,
    /// Set when the GKE integration resolved the cluster location.
    pub gke: Option<GkeMetadata>,
}

impl GlobalScope {
    pub fn with_tags(tags: BTreeMap<String, String>) -> Self {
        Self {
            tags,
            ..Default::default()
        }
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.tags.insert(key.into(), value);
        }
    }

    pub fn set_context(&mut self, name: impl Into<String>, context: Context) {
        self.contexts.insert(name.into(), context);
    }

    /// Record the API endpoint and server version under the `Kubernetes` context.
    pub fn set_kubernetes(&mut self, api_url: &str, server_version: Option<&str>) {
        let mut context = Context::new();
        context.insert("API endpoint".to_string(), json!(api_url));
        if let Some(version) = server_version {
            context.insert("Server version".to_string(), json!(version));
        }
        self.set_context(KUBERNETES_CONTEXT, context);
    }

    /// Copy tags and contexts into `alert`. Values already on the alert win.
    pub fn apply_to(&self, alert: &mut Alert) {
        for (key, value) in &self.tags {
            alert.tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for (name, context) in &self.contexts {
            let target = alert.contexts.entry(name.clone()).or_default();
            for (key, value) in context {
                target.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
}
