//! Cluster event forwarding: alert composition, enrichment, container
//! terminations and the watch loops.

mod alert;
mod buffer;
pub mod enhancers;
mod error;
mod pods;
mod watcher;

pub use alert::{
    EVENT_TYPE_NORMAL, EVENT_TYPE_WARNING, EXTRA_EVENT_METADATA, EXTRA_EVENT_SOURCE,
    EXTRA_INVOLVED_OBJECT, EXTRA_MISC_FIELDS, build_alert, clean_metadata, event_timestamp,
    object_name_tag,
};
pub use buffer::{BufferedEvent, RecentEvents, SharedEvents};
pub use enhancers::{Enhancer, EnhancerPipeline};
pub use error::{Result, WatchError};
pub use pods::{
    EXTRA_CONTAINER_STATUS, PodTerminationProcessor, Termination, build_termination_alert,
    failed_containers,
};
pub use watcher::{
    ANY_RESOURCE_VERSION, EventProcessor, EventWatcher, Handled, PodWatcher, ResourceWatcher,
    WatchCursor, WatchHandler, WatcherSettings, spawn_watchers,
};
