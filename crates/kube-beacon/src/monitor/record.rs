//! Per-CronJob monitor state.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::CronJob;
use kube_beacon_protocol::{CheckInId, MonitorConfig};

// ============================================================================
// Settings
// ============================================================================

/// Monitor parameters shared by every CronJob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub max_runtime_minutes: i64,
    pub checkin_margin_minutes: i64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_runtime_minutes: 5,
            checkin_margin_minutes: 3,
        }
    }
}

// ============================================================================
// MonitorKey
// ============================================================================

/// Index key of a CronJob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorKey {
    pub namespace: String,
    pub name: String,
}

impl MonitorKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a CronJob object, if it carries a name.
    pub fn of(cronjob: &CronJob) -> Option<Self> {
        let name = cronjob.metadata.name.as_deref()?;
        let namespace = cronjob.metadata.namespace.as_deref().unwrap_or_default();
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ============================================================================
// RunRecord
// ============================================================================

/// One started Job run awaiting its terminal check-in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunRecord {
    pub check_in_id: CheckInId,
    pub started_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(check_in_id: CheckInId, started_at: DateTime<Utc>) -> Self {
        Self {
            check_in_id,
            started_at,
        }
    }

    /// Seconds elapsed since the start check-in.
    pub fn duration_secs(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.started_at).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }
}

// ============================================================================
// MonitorRecord
// ============================================================================

/// Check-in configuration of one CronJob and its in-flight runs.
#[derive(Debug, Clone)]
pub struct MonitorRecord {
    pub slug: String,
    pub config: MonitorConfig,
    /// `spec.jobTemplate.spec.completions`, when set.
    pub completions: Option<i32>,
    runs: HashMap<String, RunRecord>,
}

impl MonitorRecord {
    /// Build a record from a CronJob. Returns `None` for unnamed objects.
    pub fn from_cronjob(cronjob: &CronJob, settings: MonitorSettings) -> Option<Self> {
        let slug = cronjob.metadata.name.clone()?;
        let mut record = Self {
            slug,
            config: MonitorConfig::crontab(
                String::new(),
                settings.max_runtime_minutes,
                settings.checkin_margin_minutes,
            ),
            completions: None,
            runs: HashMap::new(),
        };
        record.refresh(cronjob, settings);
        Some(record)
    }

    /// Re-read schedule, time zone and completions. In-flight runs are kept.
    pub fn refresh(&mut self, cronjob: &CronJob, settings: MonitorSettings) {
        let spec = cronjob.spec.as_ref();
        let schedule = spec.map(|s| s.schedule.clone()).unwrap_or_default();

        self.config = MonitorConfig::crontab(
            schedule,
            settings.max_runtime_minutes,
            settings.checkin_margin_minutes,
        );
        self.config.timezone = spec.and_then(|s| s.time_zone.clone());
        self.completions = spec
            .and_then(|s| s.job_template.spec.as_ref())
            .and_then(|s| s.completions);
    }

    /// Successful pods needed for an `ok` check-in. Defaults to 1.
    pub fn required_completions(&self) -> i32 {
        self.completions.unwrap_or(1)
    }

    pub fn run(&self, job_name: &str) -> Option<&RunRecord> {
        self.runs.get(job_name)
    }

    pub fn has_run(&self, job_name: &str) -> bool {
        self.runs.contains_key(job_name)
    }

    /// Record a started run. Returns false if the job was already recorded.
    pub fn start_run(&mut self, job_name: impl Into<String>, run: RunRecord) -> bool {
        match self.runs.entry(job_name.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(run);
                true
            }
        }
    }

    pub fn finish_run(&mut self, job_name: &str) -> Option<RunRecord> {
        self.runs.remove(job_name)
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
