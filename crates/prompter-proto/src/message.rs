use crate::role::Role;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only entity that crosses a transport. Externally the tag lives in
/// a `type` field and payload fields are camelCase, so frames stay
/// readable next to the browser clients that speak the same protocol.
///
/// Messages are immutable once sent: nothing is amended, retracted or
/// acknowledged. `StateUpdate` is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum SyncMessage {
    /// A permitted local write, replicated to every peer. `key` routes
    /// the update to the matching container on the receiving side; the
    /// relay forwards it without looking.
    StateUpdate {
        timestamp: i64,
        device_id: String,
        key: String,
        data: Value,
        role: Role,
    },
    /// Current value published for late-joining tabs. Applied exactly
    /// like a `StateUpdate`.
    InitialState {
        timestamp: i64,
        device_id: String,
        key: String,
        data: Value,
        role: Role,
    },
    /// Presence probe. Answered unconditionally — presence carries no
    /// control authority, so there is no role gate.
    Ping { timestamp: i64, device_id: String },
    Pong { timestamp: i64, device_id: String },
    /// Relay → client, on accept only: the assigned identity and how
    /// many other connections are currently open.
    Connected {
        timestamp: i64,
        device_id: String,
        total_clients: usize,
    },
    /// Relay → clients, whenever a peer leaves. `total_clients` counts
    /// the receiver's peers, excluding the receiver itself.
    ClientCountUpdate { timestamp: i64, total_clients: usize },
    /// A device announcing a role switch. Peers may reflect it in UI but
    /// are not required to act on it.
    RoleChange {
        timestamp: i64,
        device_id: String,
        role: Role,
    },
}

impl SyncMessage {
    /// Originating device, where the variant has one. The relay-produced
    /// `ClientCountUpdate` does not name a sender.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            SyncMessage::StateUpdate { device_id, .. }
            | SyncMessage::InitialState { device_id, .. }
            | SyncMessage::Ping { device_id, .. }
            | SyncMessage::Pong { device_id, .. }
            | SyncMessage::Connected { device_id, .. }
            | SyncMessage::RoleChange { device_id, .. } => Some(device_id),
            SyncMessage::ClientCountUpdate { .. } => None,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            SyncMessage::StateUpdate { timestamp, .. }
            | SyncMessage::InitialState { timestamp, .. }
            | SyncMessage::Ping { timestamp, .. }
            | SyncMessage::Pong { timestamp, .. }
            | SyncMessage::Connected { timestamp, .. }
            | SyncMessage::ClientCountUpdate { timestamp, .. }
            | SyncMessage::RoleChange { timestamp, .. } => *timestamp,
        }
    }

    pub fn ping(device_id: impl Into<String>) -> Self {
        SyncMessage::Ping {
            timestamp: now_millis(),
            device_id: device_id.into(),
        }
    }

    pub fn pong(device_id: impl Into<String>) -> Self {
        SyncMessage::Pong {
            timestamp: now_millis(),
            device_id: device_id.into(),
        }
    }

    pub fn role_change(device_id: impl Into<String>, role: Role) -> Self {
        SyncMessage::RoleChange {
            timestamp: now_millis(),
            device_id: device_id.into(),
            role,
        }
    }
}

/// Send-time stamp carried on every message. Display and debugging only;
/// conflict resolution is by arrival order, never by this value.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_update_wire_shape() {
        let msg = SyncMessage::StateUpdate {
            timestamp: 1700000000000,
            device_id: "device-abc".into(),
            key: "teleprompter-state".into(),
            data: json!({"isPlaying": true}),
            role: Role::Host,
        };
        let wire: Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(wire["type"], "STATE_UPDATE");
        assert_eq!(wire["deviceId"], "device-abc");
        assert_eq!(wire["role"], "host");
        assert_eq!(wire["data"]["isPlaying"], true);
    }

    #[test]
    fn count_update_round_trips() {
        let msg = SyncMessage::ClientCountUpdate {
            timestamp: now_millis(),
            total_clients: 2,
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"CLIENT_COUNT_UPDATE\""));
        assert!(text.contains("\"totalClients\":2"));
        let back: SyncMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_str::<SyncMessage>(r#"{"type":"SNAPSHOT","timestamp":1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn device_id_absent_only_for_count_updates() {
        let ping = SyncMessage::ping("device-1");
        assert_eq!(ping.device_id(), Some("device-1"));
        let count = SyncMessage::ClientCountUpdate {
            timestamp: 1,
            total_clients: 0,
        };
        assert_eq!(count.device_id(), None);
    }
}
