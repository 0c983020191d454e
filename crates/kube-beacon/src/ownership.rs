//! Pod → Job → CronJob ownership resolution.
//!
//! A single resolver is shared by the enhancer pipeline and the check-in
//! subsystem. Lookups always go to the cluster API; nothing is cached.

use std::sync::Arc;

use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::{debug, warn};

use crate::cluster::ClusterApi;

pub const KIND_POD: &str = "Pod";
pub const KIND_JOB: &str = "Job";
pub const KIND_CRONJOB: &str = "CronJob";

// ============================================================================
// OwnershipChain
// ============================================================================

/// Resolved ownership of a Pod. Either link may be missing.
#[derive(Debug, Clone, Default)]
pub struct OwnershipChain {
    pub job: Option<Job>,
    pub cronjob: Option<CronJob>,
}

impl OwnershipChain {
    pub fn cronjob_name(&self) -> Option<&str> {
        self.cronjob.as_ref().and_then(|c| c.metadata.name.as_deref())
    }

    pub fn job_name(&self) -> Option<&str> {
        self.job.as_ref().and_then(|j| j.metadata.name.as_deref())
    }
}

// ============================================================================
// Owner reference helpers
// ============================================================================

/// True when `owner` is the controlling owner and has the given kind.
pub fn is_controller_of_kind(owner: &OwnerReference, kind: &str) -> bool {
    owner.controller == Some(true) && owner.kind == kind
}

/// Controlling owner references of `kind`, in declaration order.
pub fn controller_refs<'a>(
    meta: &'a ObjectMeta,
    kind: &'a str,
) -> impl Iterator<Item = &'a OwnerReference> + 'a {
    meta.owner_references
        .iter()
        .flatten()
        .filter(move |owner| is_controller_of_kind(owner, kind))
}

/// First declared owner, controller or not.
pub fn first_owner(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references.as_ref().and_then(|owners| owners.first())
}

/// Name of the CronJob controlling a Job, taken from its owner references.
pub fn owning_cronjob_name(job: &Job) -> Option<&str> {
    controller_refs(&job.metadata, KIND_CRONJOB)
        .last()
        .map(|owner| owner.name.as_str())
}

// ============================================================================
// OwnershipResolver
// ============================================================================

/// Walks owner references through the cluster API.
#[derive(Clone)]
pub struct OwnershipResolver {
    cluster: Arc<dyn ClusterApi>,
}

impl OwnershipResolver {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    /// Resolve the Job and CronJob controlling a Pod.
    ///
    /// Every controlling Job reference is followed, and every controlling
    /// CronJob reference of each fetched Job. A failed fetch abandons that
    /// branch only. The last CronJob resolved wins.
    pub async fn resolve(&self, pod: &Pod) -> OwnershipChain {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let mut chain = OwnershipChain::default();

        for job_ref in controller_refs(&pod.metadata, KIND_JOB) {
            let job = match self.cluster.get_job(namespace, &job_ref.name).await {
                Ok(job) => job,
                Err(e) => {
                    log_lookup_failure(KIND_JOB, namespace, &job_ref.name, &e);
                    continue;
                }
            };

            if let Some(cronjob) = self.resolve_job(&job).await {
                chain.cronjob = Some(cronjob);
            }
            chain.job = Some(job);
        }

        chain
    }

    /// Resolve the CronJob controlling a Job, if any.
    pub async fn resolve_job(&self, job: &Job) -> Option<CronJob> {
        let namespace = job.metadata.namespace.as_deref().unwrap_or_default();
        let mut owning = None;

        for cronjob_ref in controller_refs(&job.metadata, KIND_CRONJOB) {
            match self.cluster.get_cronjob(namespace, &cronjob_ref.name).await {
                Ok(cronjob) => owning = Some(cronjob),
                Err(e) => log_lookup_failure(KIND_CRONJOB, namespace, &cronjob_ref.name, &e),
            }
        }

        owning
    }
}

fn log_lookup_failure(kind: &str, namespace: &str, name: &str, error: &crate::cluster::ClusterError) {
    if error.is_not_found() {
        debug!(kind, namespace, name, "Owner no longer exists");
    } else {
        warn!(kind, namespace, name, error = %error, "Failed to fetch owner");
    }
}

// ============================================================================
// Tests
// ============================================================================
