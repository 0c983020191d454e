//! Recently observed cluster events, replayed as breadcrumbs.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Event;
use tokio::sync::{Mutex, MutexGuard};

use super::alert::{EVENT_TYPE_WARNING, event_timestamp};

/// The parts of a cluster event kept for breadcrumbs.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedEvent {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub message: String,
    pub event_type: String,
    /// Event timestamp, or the time it was buffered when the event has none.
    pub timestamp: DateTime<Utc>,
    observed_at: DateTime<Utc>,
}

impl BufferedEvent {
    pub fn from_event(event: &Event, now: DateTime<Utc>) -> Self {
        let object = &event.involved_object;
        Self {
            namespace: object.namespace.clone().unwrap_or_default(),
            kind: object.kind.clone().unwrap_or_default(),
            name: object.name.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
            event_type: event.type_.clone().unwrap_or_default(),
            timestamp: event_timestamp(event).unwrap_or(now),
            observed_at: now,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.event_type == EVENT_TYPE_WARNING
    }

    fn is_about(&self, namespace: &str, kind: &str, name: &str) -> bool {
        self.namespace == namespace && self.kind == kind && self.name == name
    }
}

/// Bounded by entry count and by age; oldest entries go first.
#[derive(Debug)]
pub struct RecentEvents {
    entries: VecDeque<BufferedEvent>,
    capacity: usize,
    max_age: Duration,
}

impl RecentEvents {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            max_age,
        }
    }

    pub fn push(&mut self, event: &Event) {
        self.push_at(event, Utc::now());
    }

    pub fn push_at(&mut self, event: &Event, now: DateTime<Utc>) {
        if self.capacity == 0 {
            return;
        }
        self.evict_expired(now);
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BufferedEvent::from_event(event, now));
    }

    /// Events about one object, oldest first.
    pub fn filter(&self, namespace: &str, kind: &str, name: &str) -> Vec<&BufferedEvent> {
        self.entries
            .iter()
            .filter(|e| e.is_about(namespace, kind, name))
            .collect()
    }

    pub fn evict_expired(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.max_age;
        while self
            .entries
            .front()
            .is_some_and(|oldest| oldest.observed_at < horizon)
        {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One buffer read and written by every watcher of a namespace.
#[derive(Debug, Clone)]
pub struct SharedEvents(Arc<Mutex<RecentEvents>>);

impl SharedEvents {
    pub fn new(buffer: RecentEvents) -> Self {
        Self(Arc::new(Mutex::new(buffer)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, RecentEvents> {
        self.0.lock().await
    }
}

impl From<RecentEvents> for SharedEvents {
    fn from(buffer: RecentEvents) -> Self {
        Self::new(buffer)
    }
}
