//! Google Kubernetes Engine metadata.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{IntegrationError, Result};
use crate::scope::GlobalScope;

pub const METADATA_BASE_URL: &str = "http://metadata.google.internal/computeMetadata/v1";
pub const GKE_CONTEXT: &str = "Google Kubernetes Engine";

const INSTANCE_PATH: &str = "/instance/attributes/?recursive=true";
const PROJECT_PATH: &str = "/project/?recursive=true";

// The metadata server has used both key spellings. The kebab-case value wins
// unless it is empty.
#[derive(Debug, Default, Deserialize)]
struct InstanceMetadata {
    #[serde(default, rename = "cluster-name")]
    cluster_name_kebab: Option<String>,
    #[serde(default, rename = "clusterName")]
    cluster_name_camel: Option<String>,
    #[serde(default, rename = "cluster-location")]
    cluster_location_kebab: Option<String>,
    #[serde(default, rename = "clusterLocation")]
    cluster_location_camel: Option<String>,
}

impl InstanceMetadata {
    fn cluster_name(&self) -> String {
        first_non_empty(&self.cluster_name_kebab, &self.cluster_name_camel)
    }

    fn cluster_location(&self) -> String {
        first_non_empty(&self.cluster_location_kebab, &self.cluster_location_camel)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProjectMetadata {
    #[serde(default, rename = "project-id")]
    project_id_kebab: Option<String>,
    #[serde(default, rename = "projectId")]
    project_id_camel: Option<String>,
}

impl ProjectMetadata {
    fn project_id(&self) -> String {
        first_non_empty(&self.project_id_kebab, &self.project_id_camel)
    }
}

fn first_non_empty(preferred: &Option<String>, fallback: &Option<String>) -> String {
    [preferred, fallback]
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
        .cloned()
        .unwrap_or_default()
}

/// Cluster coordinates resolved from the metadata server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GkeMetadata {
    pub cluster_name: String,
    pub cluster_location: String,
    pub project_id: String,
}

impl GkeMetadata {
    fn is_complete(&self) -> bool {
        !self.cluster_name.is_empty()
            && !self.cluster_location.is_empty()
            && !self.project_id.is_empty()
    }

    /// Cloud console page of the cluster, when all coordinates are known.
    pub fn cluster_url(&self) -> Option<String> {
        self.is_complete().then(|| {
            format!(
                "https://console.cloud.google.com/kubernetes/clusters/details/{}/{}/details?project={}",
                self.cluster_location, self.cluster_name, self.project_id
            )
        })
    }

    /// Logs Explorer query for one pod's containers over the last hour.
    pub fn pod_logs_url(&self, namespace: &str, pod: &str) -> Option<String> {
        if !self.is_complete() {
            return None;
        }
        let query = [
            "resource.type%3D%22k8s_container%22".to_string(),
            format!("resource.labels.project_id%3D%22{}%22", self.project_id),
            format!("resource.labels.location%3D%22{}%22", self.cluster_location),
            format!("resource.labels.cluster_name%3D%22{}%22", self.cluster_name),
            format!("resource.labels.namespace_name%3D%22{namespace}%22"),
            format!("resource.labels.pod_name%3D%22{pod}%22"),
        ]
        .join("%0A");
        Some(format!(
            "https://console.cloud.google.com/logs/query;query={query};duration=PT1H?project={}",
            self.project_id
        ))
    }

    /// Tags, the GKE context and the metadata itself go into `scope`.
    pub fn apply_to(&self, scope: &mut GlobalScope) {
        scope.set_tag("gke_cluster_name", &self.cluster_name);
        scope.set_tag("gke_cluster_location", &self.cluster_location);
        scope.set_tag("gke_project_name", &self.project_id);

        let mut context = kube_beacon_protocol::Context::new();
        context.insert("Cluster name".to_string(), json!(self.cluster_name));
        context.insert("Cluster location".to_string(), json!(self.cluster_location));
        context.insert("GCP project".to_string(), json!(self.project_id));
        if let Some(url) = self.cluster_url() {
            context.insert("Cluster URL".to_string(), json!(url));
        }
        scope.set_context(GKE_CONTEXT, context);
        scope.gke = Some(self.clone());
    }
}

/// Query instance and project metadata under `base_url`.
pub async fn fetch(http: &reqwest::Client, base_url: &str) -> Result<GkeMetadata> {
    let instance: InstanceMetadata = read_metadata(http, &format!("{base_url}{INSTANCE_PATH}")).await?;
    let project: ProjectMetadata = read_metadata(http, &format!("{base_url}{PROJECT_PATH}")).await?;

    Ok(GkeMetadata {
        cluster_name: instance.cluster_name(),
        cluster_location: instance.cluster_location(),
        project_id: project.project_id(),
    })
}

async fn read_metadata<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> Result<T> {
    let response = http
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(IntegrationError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> GkeMetadata {
        GkeMetadata {
            cluster_name: "prod".to_string(),
            cluster_location: "europe-west1".to_string(),
            project_id: "acme-infra".to_string(),
        }
    }

    #[test]
    fn accepts_both_key_spellings() {
        let kebab: InstanceMetadata =
            serde_json::from_str(r#"{"cluster-name":"a","cluster-location":"b"}"#).unwrap();
        let camel: InstanceMetadata =
            serde_json::from_str(r#"{"clusterName":"a","clusterLocation":"b","other":1}"#).unwrap();
        assert_eq!(kebab.cluster_name(), "a");
        assert_eq!(camel.cluster_location(), "b");

        let project: ProjectMetadata =
            serde_json::from_str(r#"{"projectId":"p","numericProjectId":12}"#).unwrap();
        assert_eq!(project.project_id(), "p");
    }

    #[test]
    fn both_spellings_present_prefers_non_empty() {
        let instance: InstanceMetadata = serde_json::from_str(
            r#"{"cluster-name":"","clusterName":"prod","cluster-location":"europe-west1","clusterLocation":"us-east1"}"#,
        )
        .unwrap();
        assert_eq!(instance.cluster_name(), "prod");
        assert_eq!(instance.cluster_location(), "europe-west1");

        let project: ProjectMetadata =
            serde_json::from_str(r#"{"project-id":"acme-infra","projectId":""}"#).unwrap();
        assert_eq!(project.project_id(), "acme-infra");

        let empty: InstanceMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.cluster_name(), "");
    }

    #[test]
    fn cluster_url_needs_all_fields() {
        assert_eq!(
            metadata().cluster_url().unwrap(),
            "https://console.cloud.google.com/kubernetes/clusters/details/europe-west1/prod/details?project=acme-infra"
        );

        let partial = GkeMetadata {
            project_id: String::new(),
            ..metadata()
        };
        assert!(partial.cluster_url().is_none());
        assert!(partial.pod_logs_url("default", "web-0").is_none());
    }

    #[test]
    fn pod_logs_url_uses_resolved_values() {
        let url = metadata().pod_logs_url("payments", "worker-7").unwrap();
        assert!(url.contains("resource.labels.project_id%3D%22acme-infra%22"));
        assert!(url.contains("resource.labels.location%3D%22europe-west1%22"));
        assert!(url.contains("resource.labels.cluster_name%3D%22prod%22"));
        assert!(url.contains("resource.labels.namespace_name%3D%22payments%22"));
        assert!(url.contains("resource.labels.pod_name%3D%22worker-7%22"));
        assert!(url.ends_with("?project=acme-infra"));
    }

    #[test]
    fn apply_to_sets_tags_and_context() {
        let mut scope = GlobalScope::default();
        metadata().apply_to(&mut scope);

        assert_eq!(scope.tags["gke_cluster_name"], "prod");
        assert_eq!(scope.tags["gke_project_name"], "acme-infra");
        assert!(scope.contexts[GKE_CONTEXT].contains_key("Cluster URL"));
        assert_eq!(scope.gke, Some(metadata()));
    }
}
