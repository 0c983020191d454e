//! Read access to the Kubernetes API server.
//!
//! Everything above this module talks to the cluster through the
//! [`ClusterApi`] trait, so ownership resolution and enrichment can be
//! exercised against an in-memory cluster in tests.

mod error;
mod live;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};

pub use error::{ClusterError, Result};
pub use live::KubeCluster;

/// Namespace wildcard used by watch scopes covering the whole cluster.
pub const ALL_NAMESPACES: &str = "";

/// Get-by-name lookups used for ownership resolution and enrichment.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job>;

    async fn get_cronjob(&self, namespace: &str, name: &str) -> Result<CronJob>;
}

/// Build an `Api` for a namespace, or for the whole cluster when `namespace`
/// is [`ALL_NAMESPACES`].
pub fn scoped_api<K>(client: Client, namespace: &str) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    if namespace == ALL_NAMESPACES {
        Api::all(client)
    } else {
        Api::namespaced(client, namespace)
    }
}

/// Human readable label for a namespace, used in logs and spans.
pub fn namespace_label(namespace: &str) -> &str {
    if namespace == ALL_NAMESPACES {
        "<all>"
    } else {
        namespace
    }
}
