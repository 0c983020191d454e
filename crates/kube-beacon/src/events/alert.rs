//! Turning a cluster event into an alert.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_beacon_protocol::{Alert, Level};
use serde_json::Value;

pub const EVENT_TYPE_WARNING: &str = "Warning";
pub const EVENT_TYPE_NORMAL: &str = "Normal";

pub const EXTRA_EVENT_SOURCE: &str = "Event Source";
pub const EXTRA_INVOLVED_OBJECT: &str = "Involved Object";
pub const EXTRA_EVENT_METADATA: &str = "Event Metadata";
pub const EXTRA_MISC_FIELDS: &str = "~ Misc Event Fields";

/// `lastTimestamp`, falling back to `eventTime`.
pub fn event_timestamp(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
}

/// Tag holding the involved object's name: `pod_name`, `job_name`, ...
pub fn object_name_tag(kind: &str) -> String {
    if kind.is_empty() {
        "object_name".to_string()
    } else {
        format!("{}_name", kind.to_lowercase())
    }
}

/// Object metadata without managed fields.
pub fn clean_metadata(meta: &ObjectMeta) -> Value {
    let mut meta = meta.clone();
    meta.managed_fields = None;
    serde_json::to_value(meta).unwrap_or(Value::Null)
}

/// Base alert for a cluster event, before any enhancer runs.
pub fn build_alert(event: &Event) -> Alert {
    let object = &event.involved_object;
    let mut alert = Alert::new(event.message.clone().unwrap_or_default(), Level::Error);
    alert.timestamp = event_timestamp(event);

    let kind = object.kind.as_deref().unwrap_or_default();
    alert.set_tag("event_type", event.type_.as_deref().unwrap_or_default());
    alert.set_tag("reason", event.reason.as_deref().unwrap_or_default());
    alert.set_tag("namespace", object.namespace.as_deref().unwrap_or_default());
    alert.set_tag("kind", kind);
    alert.set_tag("object_uid", object.uid.as_deref().unwrap_or_default());
    alert.set_tag(object_name_tag(kind), object.name.as_deref().unwrap_or_default());

    if let Some(source) = &event.source {
        alert.set_extra(EXTRA_EVENT_SOURCE, to_value(source));
    }
    alert.set_extra(EXTRA_INVOLVED_OBJECT, to_value(object));
    alert.set_extra(EXTRA_EVENT_METADATA, clean_metadata(&event.metadata));

    let mut misc = to_value(event);
    if let Some(fields) = misc.as_object_mut() {
        for key in ["source", "involvedObject", "metadata"] {
            fields.remove(key);
        }
    }
    alert.set_extra(EXTRA_MISC_FIELDS, misc);

    alert
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::{EventSource, ObjectReference};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        ManagedFieldsEntry, MicroTime, Time,
    };

    fn oom_event() -> Event {
        Event {
            metadata: ObjectMeta {
                name: Some("worker.17a".to_string()),
                namespace: Some("default".to_string()),
                managed_fields: Some(vec![ManagedFieldsEntry::default()]),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some("worker".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            reason: Some("OOMKilling".to_string()),
            message: Some("OOMKilled".to_string()),
            type_: Some("Warning".to_string()),
            source: Some(EventSource {
                component: Some("kubelet".to_string()),
                host: Some("node-1".to_string()),
            }),
            count: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn build_alert_sets_tags_and_extras() {
        let alert = build_alert(&oom_event());

        assert_eq!(alert.message, "OOMKilled");
        assert_eq!(alert.level, Level::Error);
        assert_eq!(alert.tags["event_type"], "Warning");
        assert_eq!(alert.tags["reason"], "OOMKilling");
        assert_eq!(alert.tags["namespace"], "default");
        assert_eq!(alert.tags["kind"], "Pod");
        assert_eq!(alert.tags["object_uid"], "uid-1");
        assert_eq!(alert.tags["pod_name"], "worker");
        assert!(alert.fingerprint.is_empty());

        assert_eq!(alert.extra[EXTRA_EVENT_SOURCE]["component"], "kubelet");
        assert_eq!(alert.extra[EXTRA_INVOLVED_OBJECT]["name"], "worker");
        assert!(alert.extra[EXTRA_EVENT_METADATA].get("managedFields").is_none());

        let misc = &alert.extra[EXTRA_MISC_FIELDS];
        assert_eq!(misc["count"], 3);
        assert!(misc.get("source").is_none());
        assert!(misc.get("involvedObject").is_none());
        assert!(misc.get("metadata").is_none());
    }

    #[test]
    fn empty_kind_uses_object_name_tag() {
        let mut event = oom_event();
        event.involved_object.kind = None;
        let alert = build_alert(&event);
        assert_eq!(alert.tags["object_name"], "worker");
        assert!(!alert.tags.contains_key("kind"));
    }

    #[test]
    fn timestamp_prefers_last_timestamp() {
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let micro = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();

        let mut event = oom_event();
        assert_eq!(event_timestamp(&event), None);

        event.event_time = Some(MicroTime(micro));
        assert_eq!(event_timestamp(&event), Some(micro));

        event.last_timestamp = Some(Time(last));
        assert_eq!(event_timestamp(&event), Some(last));
    }

    #[test]
    fn object_name_tag_lowercases_kind() {
        assert_eq!(object_name_tag("CronJob"), "cronjob_name");
        assert_eq!(object_name_tag(""), "object_name");
    }
}
