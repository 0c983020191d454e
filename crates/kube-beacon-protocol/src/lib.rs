//! Wire types shared between kube-beacon and the monitoring backend.
//!
//! The backend protocol has two operations:
//!
//! - **Submit alert**: an enriched cluster event with message, severity,
//!   grouping fingerprint, tags, structured contexts and breadcrumbs.
//! - **Submit check-in**: a CronJob heartbeat (`in_progress`, `ok`, `error`)
//!   for a monitor slug, carrying the monitor's schedule configuration.
//!
//! Check-in identifiers are issued on the client side when a run starts, so
//! the terminal check-in of the same run can reuse them.
//!
//! # Example
//!
//! ```ignore
//! use kube_beacon_protocol::{Alert, Level};
//!
//! let mut alert = Alert::new("Back-off restarting failed container", Level::Error);
//! alert.set_tag("namespace", "default");
//! alert.extend_fingerprint(["Back-off restarting failed container"]);
//! println!("{}", serde_json::to_string(&alert)?);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Alerts
// ============================================================================

/// Severity of an alert or breadcrumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

/// A short entry describing something that happened before an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub message: String,
    pub level: Level,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Breadcrumb {
    pub fn new(message: impl Into<String>, level: Level, timestamp: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            level,
            timestamp,
            category: None,
        }
    }
}

/// Structured context attached to an alert (`"Monitor" -> {"slug": ...}`).
pub type Context = BTreeMap<String, serde_json::Value>;

/// An enriched event submitted to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Grouping key. Entries are only ever appended.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contexts: BTreeMap<String, Context>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breadcrumbs: Vec<Breadcrumb>,
}

impl Alert {
    pub fn new(message: impl Into<String>, level: Level) -> Self {
        Self {
            message: message.into(),
            level,
            ..Default::default()
        }
    }

    /// Set a tag. Empty values are ignored.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.tags.insert(key.into(), value);
    }

    pub fn set_context(&mut self, name: impl Into<String>, context: Context) {
        self.contexts.insert(name.into(), context);
    }

    /// Insert a single key into a context, creating the context if needed.
    pub fn set_context_value(
        &mut self,
        name: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) {
        self.contexts
            .entry(name.into())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extra.insert(key.into(), value);
    }

    pub fn remove_extra(&mut self, key: &str) {
        self.extra.remove(key);
    }

    /// Append a breadcrumb, dropping the oldest ones beyond `limit`.
    pub fn add_breadcrumb(&mut self, breadcrumb: Breadcrumb, limit: usize) {
        if limit == 0 {
            return;
        }
        self.breadcrumbs.push(breadcrumb);
        if self.breadcrumbs.len() > limit {
            let excess = self.breadcrumbs.len() - limit;
            self.breadcrumbs.drain(..excess);
        }
    }

    pub fn extend_fingerprint<I, S>(&mut self, parts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fingerprint.extend(parts.into_iter().map(Into::into));
    }
}

// ============================================================================
// Check-ins
// ============================================================================

/// Identifier of one monitored run, shared by its start and terminal check-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckInId(Uuid);

impl CheckInId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for CheckInId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckInId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Status reported by a check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    InProgress,
    Ok,
    Error,
}

impl CheckInStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CheckInStatus::InProgress)
    }
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckInStatus::InProgress => "in_progress",
            CheckInStatus::Ok => "ok",
            CheckInStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Schedule descriptor of a monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorSchedule {
    /// Standard five-field crontab expression.
    Crontab { value: String },
}

/// Monitor configuration sent along with every check-in (upserts the monitor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub schedule: MonitorSchedule,
    /// Minutes a run may take before it is considered timed out.
    pub max_runtime: i64,
    /// Minutes of tolerance for a late start.
    pub checkin_margin: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl MonitorConfig {
    pub fn crontab(schedule: impl Into<String>, max_runtime: i64, checkin_margin: i64) -> Self {
        Self {
            schedule: MonitorSchedule::Crontab {
                value: schedule.into(),
            },
            max_runtime,
            checkin_margin,
            timezone: None,
        }
    }
}

/// A single check-in submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub check_in_id: CheckInId,
    pub monitor_slug: String,
    pub status: CheckInStatus,
    /// Run duration in seconds (terminal check-ins only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub monitor_config: MonitorConfig,
}

// ============================================================================
// Tests
// ============================================================================
