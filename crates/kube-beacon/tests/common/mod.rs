//! Common test utilities: an in-memory cluster, a recording backend and
//! object builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{
    CronJob, CronJobSpec, Job, JobSpec, JobStatus, JobTemplateSpec,
};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Event, EventSource, ObjectReference,
    Pod, PodSpec, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use kube::core::ErrorResponse;
use uuid::Uuid;

use kube_beacon::backend::{self, Backend, BackendError};
use kube_beacon::cluster::{self, ClusterApi, ClusterError};
use kube_beacon_protocol::{Alert, CheckIn, CheckInId};

pub const NAMESPACE: &str = "default";

// ============================================================================
// FakeCluster
// ============================================================================

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory cluster. Names listed in `failing` answer with a server error.
#[derive(Default)]
pub struct FakeCluster {
    pods: Mutex<HashMap<Key, Pod>>,
    jobs: Mutex<HashMap<Key, Job>>,
    cronjobs: Mutex<HashMap<Key, CronJob>>,
    failing: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, pod: Pod) {
        let k = object_key(&pod.metadata);
        self.pods.lock().unwrap().insert(k, pod);
    }

    pub fn add_job(&self, job: Job) {
        let k = object_key(&job.metadata);
        self.jobs.lock().unwrap().insert(k, job);
    }

    pub fn add_cronjob(&self, cronjob: CronJob) {
        let k = object_key(&cronjob.metadata);
        self.cronjobs.lock().unwrap().insert(k, cronjob);
    }

    /// Every lookup of `name` fails with HTTP 500 from now on.
    pub fn fail_lookups_of(&self, name: &str) {
        self.failing.lock().unwrap().push(name.to_string());
    }

    fn check_failure(&self, name: &str) -> cluster::Result<()> {
        if self.failing.lock().unwrap().iter().any(|n| n == name) {
            return Err(ClusterError::Api(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "etcdserver: request timed out".to_string(),
                reason: "InternalError".to_string(),
                code: 500,
            })));
        }
        Ok(())
    }
}

fn object_key(meta: &ObjectMeta) -> Key {
    key(
        meta.namespace.as_deref().unwrap_or(NAMESPACE),
        meta.name.as_deref().unwrap_or_default(),
    )
}

fn lookup<K: Clone>(
    map: &Mutex<HashMap<Key, K>>,
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> cluster::Result<K> {
    map.lock()
        .unwrap()
        .get(&key(namespace, name))
        .cloned()
        .ok_or_else(|| ClusterError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> cluster::Result<Pod> {
        self.check_failure(name)?;
        lookup(&self.pods, "Pod", namespace, name)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> cluster::Result<Job> {
        self.check_failure(name)?;
        lookup(&self.jobs, "Job", namespace, name)
    }

    async fn get_cronjob(&self, namespace: &str, name: &str) -> cluster::Result<CronJob> {
        self.check_failure(name)?;
        lookup(&self.cronjobs, "CronJob", namespace, name)
    }
}

// ============================================================================
// RecordingBackend
// ============================================================================

/// Records every submission. Check-in ids echo the submitted id unless
/// `issue_ids` is set, in which case ids are 1, 2, 3, ...
#[derive(Default)]
pub struct RecordingBackend {
    pub alerts: Mutex<Vec<Alert>>,
    pub checkins: Mutex<Vec<CheckIn>>,
    issue_ids: bool,
    next_id: AtomicU64,
    fail: Mutex<bool>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issuing_ids() -> Self {
        Self {
            issue_ids: true,
            ..Default::default()
        }
    }

    /// Make every submission fail (the submission is still recorded).
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn checkins(&self) -> Vec<CheckIn> {
        self.checkins.lock().unwrap().clone()
    }

    fn result(&self) -> backend::Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(BackendError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn submit_alert(&self, alert: &Alert) -> backend::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        self.result()
    }

    async fn submit_checkin(&self, checkin: &CheckIn) -> backend::Result<CheckInId> {
        self.checkins.lock().unwrap().push(checkin.clone());
        self.result()?;
        if self.issue_ids {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CheckInId::from_uuid(Uuid::from_u128(n as u128)))
        } else {
            Ok(checkin.check_in_id)
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn owner(kind: &str, name: &str, controller: bool) -> OwnerReference {
    OwnerReference {
        api_version: if kind == "ReplicaSet" { "apps/v1" } else { "batch/v1" }.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{name}"),
        controller: Some(controller),
        block_owner_deletion: Some(true),
    }
}

pub fn meta(name: &str, owners: Vec<OwnerReference>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(format!("uid-{name}")),
        resource_version: Some("1".to_string()),
        owner_references: (!owners.is_empty()).then_some(owners),
        ..Default::default()
    }
}

pub fn pod(name: &str, owners: Vec<OwnerReference>) -> Pod {
    Pod {
        metadata: meta(name, owners),
        spec: Some(PodSpec {
            node_name: Some("node-1".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod whose only container ended with `exit_code` at `finished_at`.
pub fn with_terminated(
    mut pod: Pod,
    container: &str,
    exit_code: i32,
    message: &str,
    restart_count: i32,
    finished_at: DateTime<Utc>,
) -> Pod {
    pod.status = Some(PodStatus {
        container_statuses: Some(vec![ContainerStatus {
            name: container.to_string(),
            restart_count,
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: Some("Error".to_string()),
                    message: (!message.is_empty()).then(|| message.to_string()),
                    finished_at: Some(Time(finished_at)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod
}

pub fn cronjob(name: &str, schedule: &str) -> CronJob {
    CronJob {
        metadata: ObjectMeta {
            creation_timestamp: Some(Time(at(0, 0))),
            ..meta(name, vec![])
        },
        spec: Some(CronJobSpec {
            schedule: schedule.to_string(),
            job_template: JobTemplateSpec::default(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn with_completions(mut cronjob: CronJob, completions: i32) -> CronJob {
    if let Some(spec) = cronjob.spec.as_mut() {
        spec.job_template.spec = Some(JobSpec {
            completions: Some(completions),
            ..Default::default()
        });
    }
    cronjob
}

pub fn job(name: &str, cronjob: &str) -> Job {
    Job {
        metadata: meta(name, vec![owner("CronJob", cronjob, true)]),
        ..Default::default()
    }
}

pub fn with_status(mut job: Job, active: i32, succeeded: i32, failed: i32) -> Job {
    job.status = Some(JobStatus {
        active: Some(active),
        succeeded: Some(succeeded),
        failed: Some(failed),
        ..Default::default()
    });
    job
}

pub fn event(kind: &str, name: &str, event_type: &str, reason: &str, message: &str) -> Event {
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{name}.{}", reason.to_lowercase())),
            namespace: Some(NAMESPACE.to_string()),
            resource_version: Some("100".to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            kind: Some(kind.to_string()),
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{name}")),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        type_: Some(event_type.to_string()),
        source: Some(EventSource {
            component: Some("kubelet".to_string()),
            host: Some("node-1".to_string()),
        }),
        ..Default::default()
    }
}

pub fn at_time(mut event: Event, ts: DateTime<Utc>) -> Event {
    event.last_timestamp = Some(Time(ts));
    event
}

/// A fixed day, at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.with_ymd_and_hms(2026, 3, 1, hour, minute, 0).unwrap()
}
