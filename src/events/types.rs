//! Domain event types broadcast through the Event Bus.

use serde::{Deserialize, Serialize};

use crate::device::DeviceStatus;
use crate::recording::SessionStatus;

/// Tagged union of everything C5/C7/C8 publish to C10. `#[serde(tag =
/// "event", content = "data")]` gives each variant a stable wire name that
/// RPC Server clients subscribe to as a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum DomainEvent {
    #[serde(rename = "camera_status_update")]
    CameraStatusUpdate {
        device: String,
        status: DeviceStatus,
    },

    #[serde(rename = "camera_removed")]
    CameraRemoved { device: String },

    #[serde(rename = "recording_status_update")]
    RecordingStatusUpdate {
        session_id: String,
        device: String,
        status: SessionStatus,
    },

    #[serde(rename = "recording_rotated")]
    RecordingRotated {
        session_id: String,
        new_file_path: String,
        segment_index: u32,
    },

    #[serde(rename = "snapshot_progress")]
    SnapshotProgress {
        device: String,
        tier: u8,
        message: String,
    },

    #[serde(rename = "router_health_changed")]
    RouterHealthChanged { status: String, circuit_open: bool },

    #[serde(rename = "storage_warning")]
    StorageWarning {
        usage_percentage: f64,
        path: String,
    },

    #[serde(rename = "system_error")]
    SystemError { module: String, message: String },
}

impl DomainEvent {
    /// Stable event name, used both on the wire and for topic matching.
    pub fn event_name(&self) -> &'static str {
        match self {
            DomainEvent::CameraStatusUpdate { .. } => "camera_status_update",
            DomainEvent::CameraRemoved { .. } => "camera_removed",
            DomainEvent::RecordingStatusUpdate { .. } => "recording_status_update",
            DomainEvent::RecordingRotated { .. } => "recording_rotated",
            DomainEvent::SnapshotProgress { .. } => "snapshot_progress",
            DomainEvent::RouterHealthChanged { .. } => "router_health_changed",
            DomainEvent::StorageWarning { .. } => "storage_warning",
            DomainEvent::SystemError { .. } => "system_error",
        }
    }

    /// Topic-wildcard match: `*` matches everything, `prefix.*` matches any
    /// event name whose `prefix.` portion matches (event names here are
    /// single segments, so `prefix.*` degrades to an exact "prefix" match
    /// against the un-dotted name), otherwise exact string match.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }
        if let Some(prefix) = topic.strip_suffix(".*") {
            return self.event_name().starts_with(prefix);
        }
        self.event_name() == topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DomainEvent {
        DomainEvent::CameraStatusUpdate {
            device: "/dev/video0".to_string(),
            status: DeviceStatus::Connected,
        }
    }

    #[test]
    fn wildcard_matches_any_event() {
        assert!(sample().matches_topic("*"));
    }

    #[test]
    fn prefix_wildcard_matches_prefix_only() {
        assert!(sample().matches_topic("camera_status_update.*"));
        assert!(!sample().matches_topic("recording.*"));
    }

    #[test]
    fn exact_topic_matches_only_same_event() {
        assert!(sample().matches_topic("camera_status_update"));
        assert!(!sample().matches_topic("recording_status_update"));
    }
}
