//! [`ClusterApi`] backed by a live `kube::Client`.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{Metadata, NamespaceResourceScope, Resource};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use tracing::trace;

use super::{ClusterApi, ClusterError, Result};

/// Cluster access through the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Metadata<Ty = ObjectMeta>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        trace!(kind = K::KIND, namespace, name, "Fetching object");
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| match e {
            kube::Error::Api(ref resp) if resp.code == 404 => ClusterError::NotFound {
                kind: K::KIND,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => ClusterError::Api(other),
        })
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.get(namespace, name).await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        self.get(namespace, name).await
    }

    async fn get_cronjob(&self, namespace: &str, name: &str) -> Result<CronJob> {
        self.get(namespace, name).await
    }
}
