//! Job lifecycle → CronJob check-ins.
//!
//! Per run: `Unknown → InProgress → Ok | Error`. At most one start and one
//! terminal check-in are sent per Job, and a terminal check-in is only sent
//! for a run whose start was recorded.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use kube_beacon_protocol::{CheckIn, CheckInId, CheckInStatus};
use tracing::{debug, info, warn};

use super::index::MonitorIndex;
use super::record::{MonitorKey, RunRecord};
use crate::backend::Backend;
use crate::ownership::owning_cronjob_name;

/// What the Job informer observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobNotification {
    /// First sighting of the Job.
    Start,
    /// The Job changed.
    TerminalCheck,
    /// The Job was deleted.
    TerminalRemove,
}

impl fmt::Display for JobNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobNotification::Start => "start",
            JobNotification::TerminalCheck => "terminal-check",
            JobNotification::TerminalRemove => "terminal-remove",
        };
        f.write_str(s)
    }
}

/// Result of handling one notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    Started(CheckInId),
    Finished(CheckInStatus),
    /// The Job vanished mid-run; its run was dropped without a check-in.
    Abandoned,
    Unchanged,
}

#[derive(Clone)]
pub struct CheckinStateMachine {
    index: MonitorIndex,
    backend: Arc<dyn Backend>,
}

impl CheckinStateMachine {
    pub fn new(index: MonitorIndex, backend: Arc<dyn Backend>) -> Self {
        Self { index, backend }
    }

    pub fn index(&self) -> &MonitorIndex {
        &self.index
    }

    pub async fn handle(&self, job: &Job, notification: JobNotification) -> Transition {
        let Some(job_name) = job.metadata.name.as_deref() else {
            return Transition::Unchanged;
        };
        let Some(cronjob_name) = owning_cronjob_name(job) else {
            debug!(job = job_name, "Job is not owned by a CronJob");
            return Transition::Unchanged;
        };
        let namespace = job.metadata.namespace.as_deref().unwrap_or_default();
        let key = MonitorKey::new(namespace, cronjob_name);

        match notification {
            JobNotification::Start => self.start(&key, job_name, job).await,
            JobNotification::TerminalCheck => {
                if is_pending(job) {
                    debug!(job = job_name, "Job has no pods yet");
                    return Transition::Unchanged;
                }
                self.finish(&key, job_name, job).await
            }
            JobNotification::TerminalRemove => {
                if is_running(job) {
                    return self.abandon(&key, job_name).await;
                }
                self.finish(&key, job_name, job).await
            }
        }
    }

    async fn start(&self, key: &MonitorKey, job_name: &str, job: &Job) -> Transition {
        if is_finished(job) {
            debug!(job = job_name, "Job already finished when first seen");
            return Transition::Unchanged;
        }
        let Some(record) = self.index.get(key) else {
            debug!(job = job_name, cronjob = %key, "Owning CronJob is not indexed");
            return Transition::Unchanged;
        };

        // Held across the submission so a concurrent start cannot slip in.
        let mut record = record.lock().await;
        if record.has_run(job_name) {
            return Transition::Unchanged;
        }

        let checkin = CheckIn {
            check_in_id: CheckInId::new(),
            monitor_slug: record.slug.clone(),
            status: CheckInStatus::InProgress,
            duration: None,
            monitor_config: record.config.clone(),
        };

        info!(job = job_name, monitor = %checkin.monitor_slug, "Check-in at start of job");
        let check_in_id = match self.backend.submit_checkin(&checkin).await {
            Ok(id) => id,
            Err(e) => {
                // The id is ours, so the terminal check-in can still close it.
                warn!(job = job_name, error = %e, "Failed to submit start check-in");
                checkin.check_in_id
            }
        };

        record.start_run(job_name, RunRecord::new(check_in_id, Utc::now()));
        Transition::Started(check_in_id)
    }

    async fn finish(&self, key: &MonitorKey, job_name: &str, job: &Job) -> Transition {
        if is_running(job) {
            return Transition::Unchanged;
        }
        let status = job.status.as_ref();
        let Some(record) = self.index.get(key) else {
            return Transition::Unchanged;
        };

        let mut record = record.lock().await;
        let Some(run) = record.run(job_name).copied() else {
            debug!(job = job_name, "No recorded start, skipping terminal check-in");
            return Transition::Unchanged;
        };

        let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
        let outcome = if succeeded >= record.required_completions() {
            CheckInStatus::Ok
        } else {
            CheckInStatus::Error
        };

        let checkin = CheckIn {
            check_in_id: run.check_in_id,
            monitor_slug: record.slug.clone(),
            status: outcome,
            duration: Some(run.duration_secs(Utc::now())),
            monitor_config: record.config.clone(),
        };

        info!(job = job_name, monitor = %checkin.monitor_slug, status = %outcome, "Check-in at end of job");
        if let Err(e) = self.backend.submit_checkin(&checkin).await {
            warn!(job = job_name, error = %e, "Failed to submit terminal check-in");
        }

        record.finish_run(job_name);
        Transition::Finished(outcome)
    }

    /// Forget the run of a Job deleted while its pods were still active.
    /// Its outcome is unknown, so no terminal check-in is sent.
    async fn abandon(&self, key: &MonitorKey, job_name: &str) -> Transition {
        let Some(record) = self.index.get(key) else {
            return Transition::Unchanged;
        };
        if record.lock().await.finish_run(job_name).is_none() {
            return Transition::Unchanged;
        }
        info!(job = job_name, cronjob = %key, "Job deleted while running, dropping its run");
        Transition::Abandoned
    }
}

fn is_running(job: &Job) -> bool {
    job.status.as_ref().and_then(|s| s.active).unwrap_or(0) > 0
}

/// True while the Job has created no pods and has not finished, e.g. when
/// pod creation is blocked by a quota.
pub fn is_pending(job: &Job) -> bool {
    if is_finished(job) {
        return false;
    }
    let Some(status) = job.status.as_ref() else {
        return true;
    };
    status.active.unwrap_or(0) == 0
        && status.succeeded.unwrap_or(0) == 0
        && status.failed.unwrap_or(0) == 0
}

/// True once the Job has a completion time or a true `Complete`/`Failed`
/// condition.
pub fn is_finished(job: &Job) -> bool {
    let Some(status) = job.status.as_ref() else {
        return false;
    };
    if status.completion_time.is_some() {
        return true;
    }
    status.conditions.iter().flatten().any(|c| {
        (c.type_ == "Complete" || c.type_ == "Failed") && c.status == "True"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};

    fn job_with_status(status: JobStatus) -> Job {
        Job {
            status: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn running_job_is_not_finished() {
        assert!(!is_finished(&Job::default()));
        assert!(!is_finished(&job_with_status(JobStatus {
            active: Some(1),
            ..Default::default()
        })));
    }

    #[test]
    fn job_without_pods_is_pending() {
        assert!(is_pending(&Job::default()));
        assert!(is_pending(&job_with_status(JobStatus {
            active: Some(0),
            ..Default::default()
        })));
        assert!(!is_pending(&job_with_status(JobStatus {
            failed: Some(1),
            ..Default::default()
        })));
    }

    #[test]
    fn failed_condition_marks_finished() {
        let job = job_with_status(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(is_finished(&job));
    }

    #[test]
    fn false_condition_does_not_mark_finished() {
        let job = job_with_status(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "False".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(!is_finished(&job));
    }

    #[test]
    fn notification_display() {
        assert_eq!(JobNotification::TerminalRemove.to_string(), "terminal-remove");
    }
}
