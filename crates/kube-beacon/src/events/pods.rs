//! Containers that exit with a non-zero code, reported from Pod watches.
//!
//! A Pod notification may repeat the same terminated state many times, so
//! each termination is reported once per container restart. What was
//! reported is forgotten when the Pod is deleted.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStateTerminated, ContainerStatus, Pod};
use kube::ResourceExt;
use kube::api::WatchEvent;
use kube_beacon_protocol::{Alert, Level};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::alert::object_name_tag;
use super::buffer::SharedEvents;
use super::enhancers::EnhancerPipeline;
use super::error::Result;
use super::watcher::{Handled, WatchCursor, WatchHandler, server_error};
use crate::backend::Backend;
use crate::ownership::KIND_POD;

pub const EXTRA_CONTAINER_STATUS: &str = "Container Status";

// ============================================================================
// Terminations
// ============================================================================

/// A container whose current state is a non-zero exit.
#[derive(Debug, Clone, Copy)]
pub struct Termination<'a> {
    pub status: &'a ContainerStatus,
    pub state: &'a ContainerStateTerminated,
}

impl Termination<'_> {
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.finished_at.as_ref().map(|t| t.0)
    }

    /// The container's termination message, or a summary of the exit.
    pub fn message(&self) -> String {
        let message = self.state.message.as_deref().map(str::trim).unwrap_or_default();
        if !message.is_empty() {
            return message.to_string();
        }
        let container = &self.status.name;
        let code = self.state.exit_code;
        match self.state.reason.as_deref().filter(|r| !r.is_empty()) {
            Some(reason) => format!("Container {container} terminated ({reason}) with exit code {code}"),
            None => format!("Container {container} terminated with exit code {code}"),
        }
    }
}

/// Init and regular containers of `pod` that exited with a non-zero code.
pub fn failed_containers(pod: &Pod) -> Vec<Termination<'_>> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .filter_map(|status| {
            let state = status.state.as_ref()?.terminated.as_ref()?;
            (state.exit_code != 0).then_some(Termination { status, state })
        })
        .collect()
}

/// Base alert for a container termination, before any enhancer runs.
pub fn build_termination_alert(pod: &Pod, termination: &Termination<'_>) -> Alert {
    let mut alert = Alert::new(termination.message(), Level::Error);
    alert.timestamp = termination.finished_at();

    alert.set_tag("reason", termination.state.reason.as_deref().unwrap_or_default());
    alert.set_tag("namespace", pod.metadata.namespace.as_deref().unwrap_or_default());
    alert.set_tag("kind", KIND_POD);
    alert.set_tag("object_uid", pod.metadata.uid.as_deref().unwrap_or_default());
    alert.set_tag(object_name_tag(KIND_POD), pod.name_any());
    alert.set_tag("container_name", termination.status.name.as_str());
    alert.set_tag("exit_code", termination.state.exit_code.to_string());

    alert.set_extra(
        EXTRA_CONTAINER_STATUS,
        serde_json::to_value(termination.status).unwrap_or(Value::Null),
    );
    alert
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReportedKey {
    pod: String,
    container: String,
    restart_count: i32,
    finished_at: Option<DateTime<Utc>>,
}

impl ReportedKey {
    fn new(pod: &str, termination: &Termination<'_>) -> Self {
        Self {
            pod: pod.to_string(),
            container: termination.status.name.clone(),
            restart_count: termination.status.restart_count,
            finished_at: termination.finished_at(),
        }
    }
}

// ============================================================================
// PodTerminationProcessor
// ============================================================================

pub struct PodTerminationProcessor {
    pipeline: Arc<EnhancerPipeline>,
    backend: Arc<dyn Backend>,
    buffer: SharedEvents,
    reported: HashSet<ReportedKey>,
}

impl PodTerminationProcessor {
    pub fn new(
        pipeline: Arc<EnhancerPipeline>,
        backend: Arc<dyn Backend>,
        buffer: impl Into<SharedEvents>,
    ) -> Self {
        Self {
            pipeline,
            backend,
            buffer: buffer.into(),
            reported: HashSet::new(),
        }
    }

    /// Terminations reported for Pods that still exist.
    pub fn reported_len(&self) -> usize {
        self.reported.len()
    }

    pub async fn handle_watch_event(
        &mut self,
        notification: WatchEvent<Pod>,
        cursor: &mut WatchCursor,
    ) -> Result<Handled> {
        match notification {
            WatchEvent::Added(pod) | WatchEvent::Modified(pod) => {
                cursor.advance(pod.metadata.resource_version.as_deref());
                Ok(self.process(&pod, cursor).await)
            }
            WatchEvent::Deleted(pod) => {
                cursor.advance(pod.metadata.resource_version.as_deref());
                let key = pod_key(&pod);
                self.reported.retain(|reported| reported.pod != key);
                Ok(Handled::Skipped)
            }
            WatchEvent::Bookmark(bookmark) => {
                cursor.advance(Some(&bookmark.metadata.resource_version));
                Ok(Handled::Skipped)
            }
            WatchEvent::Error(response) => Err(server_error(response)),
        }
    }

    pub async fn process(&mut self, pod: &Pod, cursor: &WatchCursor) -> Handled {
        let key = pod_key(pod);
        let mut outcome = Handled::Skipped;

        for termination in failed_containers(pod) {
            let reported = ReportedKey::new(&key, &termination);
            if self.reported.contains(&reported) {
                continue;
            }
            if !cursor.admits(termination.finished_at()) {
                debug!(pod = %key, container = %termination.status.name, "Ignoring a termination because it is too old");
                self.reported.insert(reported);
                if outcome == Handled::Skipped {
                    outcome = Handled::Expired;
                }
                continue;
            }

            let mut alert = build_termination_alert(pod, &termination);
            self.pipeline.scope().apply_to(&mut alert);
            {
                let buffer = self.buffer.lock().await;
                self.pipeline.run_for_pod(pod, &mut alert, &buffer).await;
            }

            match self.backend.submit_alert(&alert).await {
                Ok(()) => info!(
                    container = %termination.status.name,
                    exit_code = termination.state.exit_code,
                    message = %alert.message,
                    "Container termination submitted"
                ),
                Err(e) => warn!(
                    container = %termination.status.name,
                    backend = self.backend.name(),
                    error = %e,
                    "Failed to submit container termination"
                ),
            }

            self.reported.insert(reported);
            outcome = Handled::Forwarded;
        }

        outcome
    }
}

#[async_trait]
impl WatchHandler for PodTerminationProcessor {
    type Object = Pod;
    const KIND: &'static str = "pods";

    async fn handle_watch_event(
        &mut self,
        notification: WatchEvent<Pod>,
        cursor: &mut WatchCursor,
    ) -> Result<Handled> {
        PodTerminationProcessor::handle_watch_event(self, notification, cursor).await
    }
}

/// Pods are told apart by uid; a recreated Pod with the same name is new.
fn pod_key(pod: &Pod) -> String {
    match pod.metadata.uid.as_deref() {
        Some(uid) => uid.to_string(),
        None => format!(
            "{}/{}",
            pod.metadata.namespace.as_deref().unwrap_or_default(),
            pod.name_any()
        ),
    }
}

// ============================================================================
// Tests
// ============================================================================
