//! Watch-and-enrich loops, one event watcher and one Pod watcher per
//! watched namespace.
//!
//! Each loop keeps a [`WatchCursor`] (resource version plus cutoff time).
//! The two loops of a namespace share one [`SharedEvents`] buffer. Warning
//! events are composed into alerts, enriched and submitted; everything that
//! passes the cutoff ends up in the buffer afterwards. A failed connection
//! moves the cutoff to the reconnect time, so events missed while
//! disconnected are not replayed.

use std::fmt::Debug;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{Api, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::alert::{EVENT_TYPE_WARNING, build_alert, event_timestamp};
use super::buffer::{RecentEvents, SharedEvents};
use super::enhancers::EnhancerPipeline;
use super::error::{Result, WatchError};
use super::pods::PodTerminationProcessor;
use crate::backend::Backend;
use crate::background::BackgroundTasks;
use crate::cluster::{namespace_label, scoped_api};
use crate::config::{WatchConfig, WatchScope};

/// Resource version meaning "start from any point the server has".
pub const ANY_RESOURCE_VERSION: &str = "0";

// The API server rejects watch timeouts of 295 seconds and above.
const MAX_WATCH_TIMEOUT_SECS: u32 = 290;

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub historical: bool,
    pub watch_pods: bool,
    pub reconnect_delay: Duration,
    pub timeout_seconds: u32,
    pub breadcrumb_limit: usize,
    pub buffer_capacity: usize,
    pub buffer_max_age: chrono::Duration,
}

impl WatcherSettings {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            historical: config.historical,
            watch_pods: config.pods,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            timeout_seconds: config.timeout_seconds.clamp(1, MAX_WATCH_TIMEOUT_SECS),
            breadcrumb_limit: config.breadcrumb_limit,
            buffer_capacity: config.buffer.capacity,
            buffer_max_age: chrono::Duration::minutes(config.buffer.max_age_minutes),
        }
    }

    pub fn new_buffer(&self) -> SharedEvents {
        SharedEvents::new(RecentEvents::new(self.buffer_capacity, self.buffer_max_age))
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self::from_config(&WatchConfig::default())
    }
}

// ============================================================================
// WatchCursor
// ============================================================================

/// Where a watch resumes and which events are too old to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchCursor {
    resource_version: String,
    cutoff: Option<DateTime<Utc>>,
}

impl WatchCursor {
    /// Historical mode starts without a cutoff.
    pub fn new(historical: bool, now: DateTime<Utc>) -> Self {
        Self {
            resource_version: ANY_RESOURCE_VERSION.to_string(),
            cutoff: (!historical).then_some(now),
        }
    }

    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }

    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }

    pub fn advance(&mut self, resource_version: Option<&str>) {
        if let Some(rv) = resource_version.filter(|rv| !rv.is_empty()) {
            self.resource_version = rv.to_string();
        }
    }

    /// Forget the position and only admit events from `now` on.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.resource_version = ANY_RESOURCE_VERSION.to_string();
        self.cutoff = Some(now);
    }

    /// Events without a timestamp are always admitted.
    pub fn admits(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        match (self.cutoff, timestamp) {
            (Some(cutoff), Some(ts)) => ts >= cutoff,
            _ => true,
        }
    }
}

// ============================================================================
// WatchHandler
// ============================================================================

/// What happened to one watch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// At least one alert was submitted (successfully or not).
    Forwarded,
    /// Non-warning event, kept for breadcrumbs only.
    Buffered,
    /// Older than the cutoff.
    Expired,
    /// Nothing to report: deletions, bookmarks, healthy Pods.
    Skipped,
}

/// Consumes the notifications of one watch connection.
#[async_trait]
pub trait WatchHandler: Send {
    type Object: Clone + DeserializeOwned + Debug + Send + 'static;

    /// Watched kind, for logs.
    const KIND: &'static str;

    /// Apply one watch notification, moving the cursor forward.
    ///
    /// Only an error notification from the server fails; the caller is
    /// expected to reconnect.
    async fn handle_watch_event(
        &mut self,
        notification: WatchEvent<Self::Object>,
        cursor: &mut WatchCursor,
    ) -> Result<Handled>;
}

pub(super) fn server_error(response: kube::core::ErrorResponse) -> WatchError {
    WatchError::Status {
        code: response.code,
        message: response.message,
    }
}

// ============================================================================
// EventProcessor
// ============================================================================

pub struct EventProcessor {
    pipeline: Arc<EnhancerPipeline>,
    backend: Arc<dyn Backend>,
    buffer: SharedEvents,
}

impl EventProcessor {
    pub fn new(
        pipeline: Arc<EnhancerPipeline>,
        backend: Arc<dyn Backend>,
        buffer: impl Into<SharedEvents>,
    ) -> Self {
        Self {
            pipeline,
            backend,
            buffer: buffer.into(),
        }
    }

    pub fn buffer(&self) -> &SharedEvents {
        &self.buffer
    }

    pub async fn handle_watch_event(
        &mut self,
        notification: WatchEvent<Event>,
        cursor: &mut WatchCursor,
    ) -> Result<Handled> {
        match notification {
            WatchEvent::Added(event) | WatchEvent::Modified(event) => {
                cursor.advance(event.metadata.resource_version.as_deref());
                Ok(self.process(&event, cursor).await)
            }
            WatchEvent::Deleted(event) => {
                cursor.advance(event.metadata.resource_version.as_deref());
                debug!(event = %event.name_any(), "Skipping deleted event");
                Ok(Handled::Skipped)
            }
            WatchEvent::Bookmark(bookmark) => {
                cursor.advance(Some(&bookmark.metadata.resource_version));
                Ok(Handled::Skipped)
            }
            WatchEvent::Error(response) => Err(server_error(response)),
        }
    }

    pub async fn process(&mut self, event: &Event, cursor: &WatchCursor) -> Handled {
        if !cursor.admits(event_timestamp(event)) {
            debug!(event = %event.name_any(), "Ignoring an event because it is too old");
            return Handled::Expired;
        }

        if event.type_.as_deref() != Some(EVENT_TYPE_WARNING) {
            debug!(
                event = %event.name_any(),
                event_type = event.type_.as_deref().unwrap_or_default(),
                "Buffering non-warning event"
            );
            self.buffer.lock().await.push(event);
            return Handled::Buffered;
        }

        let mut alert = build_alert(event);
        self.pipeline.scope().apply_to(&mut alert);
        {
            let buffer = self.buffer.lock().await;
            self.pipeline.run(event, &mut alert, &buffer).await;
        }

        match self.backend.submit_alert(&alert).await {
            Ok(()) => info!(
                reason = event.reason.as_deref().unwrap_or_default(),
                message = %alert.message,
                "Alert submitted"
            ),
            Err(e) => warn!(
                reason = event.reason.as_deref().unwrap_or_default(),
                backend = self.backend.name(),
                error = %e,
                "Failed to submit alert"
            ),
        }

        self.buffer.lock().await.push(event);
        Handled::Forwarded
    }
}

#[async_trait]
impl WatchHandler for EventProcessor {
    type Object = Event;
    const KIND: &'static str = "events";

    async fn handle_watch_event(
        &mut self,
        notification: WatchEvent<Event>,
        cursor: &mut WatchCursor,
    ) -> Result<Handled> {
        EventProcessor::handle_watch_event(self, notification, cursor).await
    }
}

// ============================================================================
// ResourceWatcher
// ============================================================================

enum ConnectionEnd {
    /// Server closed the watch normally; resume from the cursor.
    Closed,
    Cancelled,
}

/// Reconnecting watch over one resource kind.
pub struct ResourceWatcher<H: WatchHandler> {
    api: Api<H::Object>,
    settings: WatcherSettings,
    handler: H,
    cursor: WatchCursor,
}

pub type EventWatcher = ResourceWatcher<EventProcessor>;
pub type PodWatcher = ResourceWatcher<PodTerminationProcessor>;

impl<H: WatchHandler> ResourceWatcher<H> {
    pub fn new(api: Api<H::Object>, settings: WatcherSettings, handler: H) -> Self {
        let cursor = WatchCursor::new(settings.historical, Utc::now());
        Self {
            api,
            settings,
            handler,
            cursor,
        }
    }

    pub fn cursor(&self) -> &WatchCursor {
        &self.cursor
    }

    /// Watch until cancelled, reconnecting after every failure.
    pub async fn run(mut self, cancel: CancellationToken) {
        match self.cursor.cutoff() {
            Some(cutoff) => info!(kind = H::KIND, since = %cutoff.to_rfc2822(), "Watching"),
            None => info!(kind = H::KIND, "Watching everything available (no starting timestamp)"),
        }

        loop {
            match self.watch_once(&cancel).await {
                Ok(ConnectionEnd::Cancelled) => break,
                Ok(ConnectionEnd::Closed) => {
                    debug!(resource_version = self.cursor.resource_version(), "Watch closed, resuming");
                }
                Err(e) => {
                    warn!(kind = H::KIND, error = %e, gone = e.is_gone(), "Watch failed, reconnecting");
                    self.cursor.reset(Utc::now());
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                    }
                }
            }
        }

        info!(kind = H::KIND, "Watcher stopped");
    }

    async fn watch_once(&mut self, cancel: &CancellationToken) -> Result<ConnectionEnd> {
        let params = WatchParams::default().timeout(self.settings.timeout_seconds);
        let resource_version = self.cursor.resource_version().to_string();
        let stream = self.api.watch(&params, &resource_version).await?;
        let mut stream = pin!(stream);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(ConnectionEnd::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(notification)) => {
                    self.handler
                        .handle_watch_event(notification, &mut self.cursor)
                        .await?;
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(ConnectionEnd::Closed),
            }
        }
    }
}

/// Spawn the event watcher, and the Pod watcher unless disabled, for every
/// namespace of `scope`.
pub fn spawn_watchers(
    tasks: &BackgroundTasks,
    client: &Client,
    scope: &WatchScope,
    pipeline: Arc<EnhancerPipeline>,
    backend: Arc<dyn Backend>,
    settings: &WatcherSettings,
) {
    for namespace in scope.namespaces() {
        let label = namespace_label(&namespace).to_string();
        let buffer = settings.new_buffer();

        let processor = EventProcessor::new(pipeline.clone(), backend.clone(), buffer.clone());
        let watcher = EventWatcher::new(
            scoped_api::<Event>(client.clone(), &namespace),
            settings.clone(),
            processor,
        );
        tasks.spawn(
            format!("event-watcher/{label}"),
            watcher
                .run(tasks.cancellation_token())
                .instrument(info_span!("event_watcher", namespace = %label)),
        );

        if !settings.watch_pods {
            continue;
        }
        let terminations = PodTerminationProcessor::new(pipeline.clone(), backend.clone(), buffer);
        let watcher = PodWatcher::new(
            scoped_api::<Pod>(client.clone(), &namespace),
            settings.clone(),
            terminations,
        );
        tasks.spawn(
            format!("pod-watcher/{label}"),
            watcher
                .run(tasks.cancellation_token())
                .instrument(info_span!("pod_watcher", namespace = %label)),
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
