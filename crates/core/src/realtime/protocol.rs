//! JSON text-frame protocol of the push channel
//!
//! Outbound: `{"type":"join","topic":<topic>,"ref":<n>}`.
//! Inbound: `{"type":"event","event":<kind>,"topic":<topic>,"payload":{...}}`
//! plus `reply` and `heartbeat` control frames.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tallysync_domain::{NotificationEvent, NotificationKind, TallySyncError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Frame {
    Join {
        topic: String,
        #[serde(rename = "ref")]
        reference: u64,
    },
    Event {
        event: String,
        topic: String,
        #[serde(default)]
        payload: Value,
    },
    Reply {
        #[serde(default, rename = "ref")]
        reference: Option<u64>,
        #[serde(default)]
        status: Option<String>,
    },
    Heartbeat,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Notification(NotificationEvent),
    /// Reply or heartbeat; consumed silently.
    Control,
    /// Event whose kind this client does not know.
    UnknownEvent(String),
    /// Event for a topic this connection did not join.
    ForeignTopic(String),
}

/// A frame that could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unexpected outbound-only frame from server")]
    UnexpectedFrame,
}

impl From<ProtocolError> for TallySyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Encode the join frame sent after every successful handshake.
pub fn encode_join(topic: &str, reference: u64) -> String {
    let frame = Frame::Join { topic: topic.to_owned(), reference };
    // Serializing a struct of strings and integers cannot fail.
    serde_json::to_string(&frame).unwrap_or_default()
}

/// Decode an inbound text frame for a connection joined to `topic`.
pub fn decode(text: &str, topic: &str) -> Result<Inbound, ProtocolError> {
    let frame: Frame =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match frame {
        Frame::Event { topic: frame_topic, .. } if frame_topic != topic => {
            Ok(Inbound::ForeignTopic(frame_topic))
        }
        Frame::Event { event, payload, .. } => match NotificationKind::from_str(&event) {
            Ok(kind) => Ok(Inbound::Notification(NotificationEvent::new(kind, payload))),
            Err(_) => Ok(Inbound::UnknownEvent(event)),
        },
        Frame::Reply { .. } | Frame::Heartbeat => Ok(Inbound::Control),
        Frame::Join { .. } => Err(ProtocolError::UnexpectedFrame),
    }
}
