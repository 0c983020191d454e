//! Process-wide index of monitored CronJobs.
//!
//! Written by the CronJob informer (records) and the check-in state machine
//! (runs), concurrently. The map itself is a `DashMap`; each record sits
//! behind its own async mutex so unrelated CronJobs never wait on each other.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use k8s_openapi::api::batch::v1::CronJob;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::record::{MonitorKey, MonitorRecord, MonitorSettings};

pub type SharedRecord = Arc<Mutex<MonitorRecord>>;

#[derive(Clone, Default)]
pub struct MonitorIndex {
    records: Arc<DashMap<MonitorKey, SharedRecord>>,
    settings: MonitorSettings,
}

impl MonitorIndex {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings
    }

    /// Create a record for a new CronJob. A duplicate add is a no-op.
    ///
    /// Returns true when a record was created.
    pub fn on_cronjob_added(&self, cronjob: &CronJob) -> bool {
        let Some(key) = MonitorKey::of(cronjob) else {
            debug!("Ignoring CronJob without a name");
            return false;
        };

        match self.records.entry(key) {
            Entry::Occupied(entry) => {
                debug!(cronjob = %entry.key(), "CronJob already indexed");
                false
            }
            Entry::Vacant(entry) => {
                let Some(record) = MonitorRecord::from_cronjob(cronjob, self.settings) else {
                    return false;
                };
                info!(cronjob = %entry.key(), schedule = ?record.config.schedule, "Monitoring CronJob");
                entry.insert(Arc::new(Mutex::new(record)));
                true
            }
        }
    }

    /// Refresh a CronJob's monitor configuration, keeping its in-flight runs.
    /// Unknown CronJobs are added.
    pub async fn on_cronjob_updated(&self, cronjob: &CronJob) {
        let Some(key) = MonitorKey::of(cronjob) else {
            return;
        };

        let Some(record) = self.get(&key) else {
            self.on_cronjob_added(cronjob);
            return;
        };

        record.lock().await.refresh(cronjob, self.settings);
        debug!(cronjob = %key, "CronJob monitor refreshed");
    }

    /// Drop a CronJob's record and every run in it. No terminal check-ins are
    /// sent for abandoned runs.
    pub fn on_cronjob_deleted(&self, cronjob: &CronJob) -> bool {
        let Some(key) = MonitorKey::of(cronjob) else {
            return false;
        };

        match self.records.remove(&key) {
            Some(_) => {
                info!(cronjob = %key, "Stopped monitoring CronJob");
                true
            }
            None => {
                debug!(cronjob = %key, "Deleted CronJob was not indexed");
                false
            }
        }
    }

    /// Record handle for a CronJob. The map guard is released before return.
    pub fn get(&self, key: &MonitorKey) -> Option<SharedRecord> {
        self.records.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &MonitorKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use k8s_openapi::api::batch::v1::{CronJobSpec, JobSpec, JobTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube_beacon_protocol::CheckInId;

    use crate::monitor::RunRecord;

    fn cronjob(namespace: &str, name: &str, schedule: &str, completions: Option<i32>) -> CronJob {
        CronJob {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(CronJobSpec {
                schedule: schedule.to_string(),
                job_template: JobTemplateSpec {
                    metadata: None,
                    spec: Some(JobSpec {
                        completions,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn duplicate_add_is_noop() {
        let index = MonitorIndex::default();
        let cj = cronjob("batch", "nightly", "0 2 * * *", None);

        assert!(index.on_cronjob_added(&cj));
        assert!(!index.on_cronjob_added(&cronjob("batch", "nightly", "0 5 * * *", None)));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_add_keeps_original_schedule() {
        let index = MonitorIndex::default();
        index.on_cronjob_added(&cronjob("batch", "nightly", "0 2 * * *", None));
        index.on_cronjob_added(&cronjob("batch", "nightly", "0 5 * * *", None));

        let record = index.get(&MonitorKey::new("batch", "nightly")).unwrap();
        let record = record.lock().await;
        assert_eq!(
            record.config.schedule,
            kube_beacon_protocol::MonitorSchedule::Crontab {
                value: "0 2 * * *".to_string()
            }
        );
    }

    #[test]
    fn same_name_in_different_namespaces_is_separate() {
        let index = MonitorIndex::default();
        assert!(index.on_cronjob_added(&cronjob("a", "nightly", "0 2 * * *", None)));
        assert!(index.on_cronjob_added(&cronjob("b", "nightly", "0 2 * * *", None)));
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn update_refreshes_and_keeps_runs() {
        let index = MonitorIndex::default();
        index.on_cronjob_added(&cronjob("batch", "nightly", "0 2 * * *", None));
        let key = MonitorKey::new("batch", "nightly");

        index
            .get(&key)
            .unwrap()
            .lock()
            .await
            .start_run("nightly-1", RunRecord::new(CheckInId::new(), Utc::now()));

        index
            .on_cronjob_updated(&cronjob("batch", "nightly", "0 2 * * *", Some(2)))
            .await;

        let record = index.get(&key).unwrap();
        let record = record.lock().await;
        assert_eq!(record.required_completions(), 2);
        assert!(record.has_run("nightly-1"));
    }

    #[tokio::test]
    async fn update_of_unknown_cronjob_adds_it() {
        let index = MonitorIndex::default();
        index
            .on_cronjob_updated(&cronjob("batch", "weekly", "0 0 * * 0", None))
            .await;
        assert!(index.contains(&MonitorKey::new("batch", "weekly")));
    }

    #[test]
    fn delete_removes_record() {
        let index = MonitorIndex::default();
        let cj = cronjob("batch", "nightly", "0 2 * * *", None);
        index.on_cronjob_added(&cj);

        assert!(index.on_cronjob_deleted(&cj));
        assert!(index.is_empty());
        assert!(!index.on_cronjob_deleted(&cj));
    }
}
