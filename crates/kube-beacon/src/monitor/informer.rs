//! CronJob and Job subscriptions.
//!
//! Both are built on `kube::runtime::watcher`, which lists, then watches,
//! and re-lists after a desync. [`ObjectTracker`] turns that stream into
//! informer-style added / modified / deleted notifications.

use std::collections::{HashMap, HashSet};
use std::pin::pin;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::checkin::{CheckinStateMachine, JobNotification};
use super::index::MonitorIndex;
use super::sync::{SyncGroup, SyncSignal, SyncWaiter};
use crate::background::BackgroundTasks;
use crate::cluster::{namespace_label, scoped_api};

// ============================================================================
// ObjectTracker
// ============================================================================

/// Informer notification derived from the watcher stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl Change<Job> {
    pub fn notification(&self) -> (&Job, JobNotification) {
        match self {
            Change::Added(job) => (job, JobNotification::Start),
            Change::Modified(job) => (job, JobNotification::TerminalCheck),
            Change::Deleted(job) => (job, JobNotification::TerminalRemove),
        }
    }
}

type ObjectKey = (String, String);

/// Last known state of every object, keyed by namespace and name.
pub struct ObjectTracker<K> {
    known: HashMap<ObjectKey, K>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl<K> Default for ObjectTracker<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }
}

impl<K: Resource + Clone> ObjectTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn observe(&mut self, event: watcher::Event<K>) -> Vec<Change<K>> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(object_key(&obj));
                }
                self.apply(obj).into_iter().collect()
            }
            watcher::Event::InitDone => self.finish_relist(),
            watcher::Event::Apply(obj) => self.apply(obj).into_iter().collect(),
            watcher::Event::Delete(obj) => {
                self.known.remove(&object_key(&obj));
                vec![Change::Deleted(obj)]
            }
        }
    }

    /// Unchanged resource version means a resync; nothing to report.
    fn apply(&mut self, obj: K) -> Option<Change<K>> {
        let version = obj.resource_version();
        match self.known.insert(object_key(&obj), obj.clone()) {
            None => Some(Change::Added(obj)),
            Some(previous) if previous.resource_version() == version => None,
            Some(_) => Some(Change::Modified(obj)),
        }
    }

    /// Objects that vanished while disconnected are reported deleted with
    /// their last known state.
    fn finish_relist(&mut self) -> Vec<Change<K>> {
        let Some(seen) = self.relisted.take() else {
            return Vec::new();
        };
        let vanished: Vec<ObjectKey> = self
            .known
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();

        vanished
            .into_iter()
            .filter_map(|key| self.known.remove(&key))
            .map(Change::Deleted)
            .collect()
    }
}

fn object_key<K: Resource>(obj: &K) -> ObjectKey {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

// ============================================================================
// Informers
// ============================================================================

/// Keep the index in step with the CronJobs in `api`'s scope.
pub async fn run_cronjob_informer(
    api: Api<CronJob>,
    index: MonitorIndex,
    signal: SyncSignal,
    cancel: CancellationToken,
) {
    info!("Starting CronJob informer");
    let mut stream = pin!(watcher(api, watcher::Config::default()).default_backoff());
    let mut tracker = ObjectTracker::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(error = %e, "CronJob watch failed, retrying");
                continue;
            }
            None => {
                warn!("CronJob watch stream ended");
                break;
            }
        };

        let relist_done = matches!(event, watcher::Event::InitDone);
        for change in tracker.observe(event) {
            apply_cronjob_change(&index, change).await;
        }
        if relist_done && !signal.is_synced() {
            info!(cronjobs = tracker.len(), "CronJob informer synced");
            signal.mark_synced();
        }
    }

    info!("CronJob informer stopped");
}

pub async fn apply_cronjob_change(index: &MonitorIndex, change: Change<CronJob>) {
    match change {
        Change::Added(cronjob) => {
            index.on_cronjob_added(&cronjob);
        }
        Change::Modified(cronjob) => index.on_cronjob_updated(&cronjob).await,
        Change::Deleted(cronjob) => {
            index.on_cronjob_deleted(&cronjob);
        }
    }
}

/// Feed Job lifecycle changes to the check-in state machine.
///
/// Nothing is processed until `cronjobs_synced` fires, so the first
/// sighting of every Job finds its CronJob already indexed.
pub async fn run_job_informer(
    api: Api<Job>,
    machine: CheckinStateMachine,
    signal: SyncSignal,
    mut cronjobs_synced: SyncWaiter,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        result = cronjobs_synced.wait() => {
            if let Err(e) = result {
                warn!(error = %e, "Not starting Job informer");
                return;
            }
        }
    }

    info!("Starting Job informer");
    let mut stream = pin!(watcher(api, watcher::Config::default()).default_backoff());
    let mut tracker = ObjectTracker::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(error = %e, "Job watch failed, retrying");
                continue;
            }
            None => {
                warn!("Job watch stream ended");
                break;
            }
        };

        let relist_done = matches!(event, watcher::Event::InitDone);
        for change in tracker.observe(event) {
            let (job, notification) = change.notification();
            debug!(job = %job.name_any(), %notification, "Job notification");
            machine.handle(job, notification).await;
        }
        if relist_done && !signal.is_synced() {
            info!(jobs = tracker.len(), "Job informer synced");
            signal.mark_synced();
        }
    }

    info!("Job informer stopped");
}

/// Spawn the CronJob and Job informers for one namespace (or the whole
/// cluster) and register both with `group`.
pub fn spawn_informers(
    tasks: &BackgroundTasks,
    client: &Client,
    namespace: &str,
    machine: &CheckinStateMachine,
    group: &SyncGroup,
) {
    let label = namespace_label(namespace).to_string();
    let cronjob_signal = group.register(format!("cronjobs/{label}"));
    let job_signal = group.register(format!("jobs/{label}"));
    let cronjobs_synced = cronjob_signal.waiter();

    tasks.spawn(
        format!("cronjob-informer/{label}"),
        run_cronjob_informer(
            scoped_api(client.clone(), namespace),
            machine.index().clone(),
            cronjob_signal,
            tasks.cancellation_token(),
        )
        .instrument(info_span!("cronjob_informer", namespace = %label)),
    );

    tasks.spawn(
        format!("job-informer/{label}"),
        run_job_informer(
            scoped_api(client.clone(), namespace),
            machine.clone(),
            job_signal,
            cronjobs_synced,
            tasks.cancellation_token(),
        )
        .instrument(info_span!("job_informer", namespace = %label)),
    );
}

// ============================================================================
// Tests
// ============================================================================
