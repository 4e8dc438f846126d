//! Real-time channel event schemas.
//!
//! Every event is a tagged variant with a fixed payload shape; unknown
//! event names or malformed payloads fail deserialization and are
//! answered with a channel `error` event instead of being trusted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::group::GroupView;
use super::message::ChatMessage;

/// Events a client may send over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinGroup { group_id: Uuid },

    #[serde(rename_all = "camelCase")]
    LeaveGroup { group_id: Uuid },

    #[serde(rename_all = "camelCase")]
    SendMessage { group_id: Uuid, content: String },

    #[serde(rename_all = "camelCase")]
    ToggleReadyStatus { group_id: Uuid },

    #[serde(rename_all = "camelCase")]
    StartRide { group_id: Uuid },
}

/// A member's live readiness flag as broadcast to the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyState {
    pub user_id: Uuid,
    pub display_name: String,
    pub ready: bool,
}

/// Events the server broadcasts to a group room. Outbound only, so
/// there is no Deserialize impl.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ReceiveMessage(ChatMessage),

    GroupUpdate(Box<GroupView>),

    #[serde(rename_all = "camelCase")]
    GroupReadyStatusUpdated { members: Vec<ReadyState> },

    #[serde(rename_all = "camelCase")]
    CountdownStarted { end_time: DateTime<Utc> },

    #[serde(rename_all = "camelCase")]
    CountdownCancelled,

    RideStarted,

    /// Coordinator-side rejection surfaced to the offending client only.
    #[serde(rename_all = "camelCase")]
    Error { kind: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_format() {
        let json = r#"{"event":"toggle-ready-status","data":{"groupId":"7f3c3b52-9c34-4e2e-9a6f-4a4e8a6d0a11"}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ClientEvent::ToggleReadyStatus { .. }));
    }

    #[test]
    fn test_send_message_payload() {
        let json = r#"{"event":"send-message","data":{"groupId":"7f3c3b52-9c34-4e2e-9a6f-4a4e8a6d0a11","content":"omw"}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::SendMessage { content, .. } => assert_eq!(content, "omw"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        let json = r#"{"event":"drop-tables","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_malformed_payload_rejected() {
        // groupId must be a UUID
        let json = r#"{"event":"join-group","data":{"groupId":42}}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_countdown_started_serializes_end_time() {
        let event = ServerEvent::CountdownStarted {
            end_time: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"countdown-started""#));
        assert!(json.contains("endTime"));
    }

    #[test]
    fn test_ride_started_wire_name() {
        let json = serde_json::to_string(&ServerEvent::RideStarted).unwrap();
        assert!(json.contains(r#""event":"ride-started""#));
    }

    #[test]
    fn test_group_update_events_are_comparable() {
        use crate::models::group::GroupStatus;

        let now = Utc::now();
        let view = GroupView {
            id: Uuid::new_v4(),
            name: "Morning carpool".to_string(),
            admin_id: Uuid::new_v4(),
            status: GroupStatus::Open,
            invites: Vec::new(),
            requests: Vec::new(),
            members: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let a = ServerEvent::GroupUpdate(Box::new(view.clone()));
        let b = ServerEvent::GroupUpdate(Box::new(view));
        assert_eq!(a, b);
    }
}
