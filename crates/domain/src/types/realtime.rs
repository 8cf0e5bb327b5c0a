//! Realtime connection state and push notifications

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::NOTIFICATION_ENTITY_FIELD;
use crate::impl_wire_name_conversions;

/// Push connection lifecycle.
///
/// Legal edges: `Disconnected -> Connecting -> Connected -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl_wire_name_conversions!(ConnectionState {
    Disconnected => "disconnected",
    Connecting => "connecting",
    Connected => "connected",
});

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connected, Self::Disconnected)
        )
    }
}

/// Snapshot of the realtime channel published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive failed handshakes since the last successful connect.
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Incremented on every entry into `Connected`.
    pub session: u64,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self { state: ConnectionState::Disconnected, retry_count: 0, last_error: None, session: 0 }
    }
}

/// Kinds of server-side change pushed over the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Created,
    Updated,
    Deleted,
    BillGenerated,
    RefreshRequested,
}

impl_wire_name_conversions!(NotificationKind {
    Created => "created",
    Updated => "updated",
    Deleted => "deleted",
    BillGenerated => "bill-generated",
    RefreshRequested => "refresh-requested",
});

/// Decoded push notification. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    #[serde(default)]
    pub payload: Value,
}

impl NotificationEvent {
    pub fn new(kind: NotificationKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Entity type named by the payload, if any.
    pub fn entity(&self) -> Option<&str> {
        self.payload.get(NOTIFICATION_ENTITY_FIELD).and_then(Value::as_str)
    }
}
