//! Ordered alert enhancers.
//!
//! Each step reads the involved object and mutates the outgoing alert. A step
//! that finds nothing to do leaves the alert alone. Fingerprint entries are
//! only ever appended.

use std::sync::Arc;

use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Event, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_beacon_protocol::{Alert, Breadcrumb, Context, Level};
use serde_json::json;
use tracing::{debug, trace};

use super::alert::{EXTRA_INVOLVED_OBJECT, clean_metadata};
use super::buffer::RecentEvents;
use crate::integrations::gke::GKE_CONTEXT;
use crate::ownership::{KIND_CRONJOB, KIND_JOB, KIND_POD, OwnershipResolver, first_owner};
use crate::scope::GlobalScope;

pub const EXTRA_POD_METADATA: &str = "Pod Metadata";
pub const CRONJOB_CONTEXT: &str = "Cronjob";
pub const MONITOR_CONTEXT: &str = "Monitor";

// ============================================================================
// Enhancer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enhancer {
    /// Node, pod metadata, buffered pod events and the message fingerprint.
    PodContext,
    /// Fingerprint, tag, breadcrumb and contexts of an owning CronJob.
    CronJobAttribution,
    /// Fingerprint from the first owner, or the object's own name.
    OwnerFallback,
}

impl Enhancer {
    pub const DEFAULT_ORDER: [Enhancer; 3] = [
        Enhancer::PodContext,
        Enhancer::CronJobAttribution,
        Enhancer::OwnerFallback,
    ];
}

/// What earlier steps learned about the involved object.
#[derive(Debug, Default)]
struct Findings {
    pod: Option<Pod>,
    job: Option<Job>,
    cronjob: Option<CronJob>,
    attributed: bool,
}

impl Findings {
    fn object_meta(&self) -> Option<&ObjectMeta> {
        self.pod
            .as_ref()
            .map(|p| &p.metadata)
            .or_else(|| self.job.as_ref().map(|j| &j.metadata))
            .or_else(|| self.cronjob.as_ref().map(|c| &c.metadata))
    }
}

/// Borrowed view of the involved object reference.
struct Involved<'a> {
    namespace: &'a str,
    kind: &'a str,
    name: &'a str,
}

impl<'a> Involved<'a> {
    fn of(object: &'a ObjectReference) -> Self {
        Self {
            namespace: object.namespace.as_deref().unwrap_or_default(),
            kind: object.kind.as_deref().unwrap_or_default(),
            name: object.name.as_deref().unwrap_or_default(),
        }
    }
}

// ============================================================================
// EnhancerPipeline
// ============================================================================

pub struct EnhancerPipeline {
    steps: Vec<Enhancer>,
    resolver: OwnershipResolver,
    scope: Arc<GlobalScope>,
    breadcrumb_limit: usize,
}

impl EnhancerPipeline {
    pub fn new(resolver: OwnershipResolver, scope: Arc<GlobalScope>, breadcrumb_limit: usize) -> Self {
        Self::with_steps(
            Enhancer::DEFAULT_ORDER.to_vec(),
            resolver,
            scope,
            breadcrumb_limit,
        )
    }

    pub fn with_steps(
        steps: Vec<Enhancer>,
        resolver: OwnershipResolver,
        scope: Arc<GlobalScope>,
        breadcrumb_limit: usize,
    ) -> Self {
        Self {
            steps,
            resolver,
            scope,
            breadcrumb_limit,
        }
    }

    pub fn scope(&self) -> &GlobalScope {
        &self.scope
    }

    /// Enrich an alert raised by a cluster event.
    pub async fn run(&self, event: &Event, alert: &mut Alert, buffer: &RecentEvents) {
        self.run_on(&event.involved_object, Findings::default(), alert, buffer)
            .await;
    }

    /// Enrich an alert about a Pod already at hand; it is not fetched again.
    pub async fn run_for_pod(&self, pod: &Pod, alert: &mut Alert, buffer: &RecentEvents) {
        let object = ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some(KIND_POD.to_string()),
            namespace: pod.metadata.namespace.clone(),
            name: pod.metadata.name.clone(),
            uid: pod.metadata.uid.clone(),
            ..Default::default()
        };
        let findings = Findings {
            pod: Some(pod.clone()),
            ..Default::default()
        };
        self.run_on(&object, findings, alert, buffer).await;
    }

    async fn run_on(
        &self,
        object: &ObjectReference,
        mut findings: Findings,
        alert: &mut Alert,
        buffer: &RecentEvents,
    ) {
        for step in &self.steps {
            trace!(step = ?step, fingerprint = ?alert.fingerprint, "Running enhancer");
            match step {
                Enhancer::PodContext => self.pod_context(object, alert, buffer, &mut findings).await,
                Enhancer::CronJobAttribution => {
                    self.cronjob_attribution(object, alert, &mut findings).await
                }
                Enhancer::OwnerFallback => self.owner_fallback(object, alert, &mut findings).await,
            }
        }
        debug!(fingerprint = ?alert.fingerprint, "Enhancers done");
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    async fn pod_context(
        &self,
        object: &ObjectReference,
        alert: &mut Alert,
        buffer: &RecentEvents,
        findings: &mut Findings,
    ) {
        let involved = Involved::of(object);
        if involved.kind != KIND_POD {
            return;
        }

        if findings.pod.is_none() {
            match self
                .resolver
                .cluster()
                .get_pod(involved.namespace, involved.name)
                .await
            {
                Ok(pod) => findings.pod = Some(pod),
                Err(e) => debug!(pod = involved.name, error = %e, "Pod not available"),
            }
        }
        if let Some(pod) = findings.pod.as_ref() {
            let node = pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
            alert.set_tag("node_name", node.unwrap_or_default());
            alert.set_extra(EXTRA_POD_METADATA, clean_metadata(&pod.metadata));
            alert.remove_extra(EXTRA_INVOLVED_OBJECT);
        }

        for buffered in buffer.filter(involved.namespace, KIND_POD, involved.name) {
            let level = if buffered.is_warning() {
                Level::Warning
            } else {
                Level::Info
            };
            alert.add_breadcrumb(
                Breadcrumb::new(buffered.message.clone(), level, buffered.timestamp),
                self.breadcrumb_limit,
            );
        }

        seed_fingerprint(alert);
        alert.message = format!("{}: {}", involved.name, alert.message);

        if let Some(url) = self
            .scope
            .gke
            .as_ref()
            .and_then(|gke| gke.pod_logs_url(involved.namespace, involved.name))
        {
            alert.set_context_value(GKE_CONTEXT, "Pod Logs", json!(url));
        }
    }

    async fn cronjob_attribution(
        &self,
        object: &ObjectReference,
        alert: &mut Alert,
        findings: &mut Findings,
    ) {
        let involved = Involved::of(object);
        let cronjob = match involved.kind {
            KIND_POD => match findings.pod.as_ref() {
                Some(pod) => {
                    let chain = self.resolver.resolve(pod).await;
                    findings.job = chain.job;
                    chain.cronjob
                }
                None => None,
            },
            KIND_JOB => match self.resolver.cluster().get_job(involved.namespace, involved.name).await {
                Ok(job) => {
                    let cronjob = self.resolver.resolve_job(&job).await;
                    findings.job = Some(job);
                    cronjob
                }
                Err(e) => {
                    debug!(job = involved.name, error = %e, "Job not available");
                    None
                }
            },
            _ => None,
        };
        let Some(cronjob) = cronjob else {
            return;
        };
        let Some(name) = cronjob.metadata.name.clone() else {
            return;
        };

        seed_fingerprint(alert);
        alert.extend_fingerprint([KIND_CRONJOB.to_string(), name.clone()]);
        alert.set_tag("cronjob_name", name.clone());

        if let Some(created) = cronjob.metadata.creation_timestamp.as_ref() {
            alert.add_breadcrumb(
                Breadcrumb::new(format!("Created cronjob {name}"), Level::Info, created.0),
                self.breadcrumb_limit,
            );
        }

        let mut context = Context::new();
        context.insert("Metadata".to_string(), clean_metadata(&cronjob.metadata));
        alert.set_context(CRONJOB_CONTEXT, context);
        alert.set_context_value(MONITOR_CONTEXT, "slug", json!(name));

        findings.cronjob = Some(cronjob);
        findings.attributed = true;
    }

    async fn owner_fallback(&self, object: &ObjectReference, alert: &mut Alert, findings: &mut Findings) {
        if findings.attributed {
            return;
        }
        let involved = Involved::of(object);

        if findings.object_meta().is_none() && involved.kind == KIND_CRONJOB {
            match self
                .resolver
                .cluster()
                .get_cronjob(involved.namespace, involved.name)
                .await
            {
                Ok(cronjob) => findings.cronjob = Some(cronjob),
                Err(e) => debug!(cronjob = involved.name, error = %e, "CronJob not available"),
            }
        }

        seed_fingerprint(alert);
        match findings.object_meta().and_then(first_owner) {
            Some(owner) => {
                alert.extend_fingerprint([owner.kind.clone(), owner.name.clone()]);
            }
            None => {
                // Standalone object, most likely with a unique name.
                alert.extend_fingerprint([involved.name]);
            }
        }
    }
}

/// Start the fingerprint with the alert message unless a step already did.
fn seed_fingerprint(alert: &mut Alert) {
    if alert.fingerprint.is_empty() {
        let message = alert.message.clone();
        alert.extend_fingerprint([message]);
    }
}

// ============================================================================
// Tests
// ============================================================================
