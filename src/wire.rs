//! Wire frames exchanged with the server.
//!
//! One JSON object per frame: `{topic, type, data?, timestamp, id?}`.
//! The `type` field distinguishes application payloads (`update`) from
//! control frames (`subscribe`, `unsubscribe`, `ping`, `pong`); payloads
//! stay opaque (`serde_json::Value`) so routing never inspects their shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Topic assumed for inbound frames that carry none.
pub const DEFAULT_TOPIC: &str = "default";

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

/// Frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Update,
    Ping,
    Pong,
    Subscribe,
    Unsubscribe,
}

/// A single wire frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Frame {
    /// Application payload frame.
    pub fn update(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            kind: FrameKind::Update,
            data: Some(data),
            timestamp: Utc::now(),
            id: Some(Uuid::new_v4().to_string()),
        }
    }

    /// `subscribe` control frame, sent once per topic per physical connection.
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::control(topic.into(), FrameKind::Subscribe)
    }

    /// `unsubscribe` control frame.
    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self::control(topic.into(), FrameKind::Unsubscribe)
    }

    /// Heartbeat request.
    pub fn ping() -> Self {
        Self::control(default_topic(), FrameKind::Ping)
    }

    /// Heartbeat reply.
    pub fn pong() -> Self {
        Self::control(default_topic(), FrameKind::Pong)
    }

    fn control(topic: String, kind: FrameKind) -> Self {
        Self {
            topic,
            kind,
            data: None,
            timestamp: Utc::now(),
            id: None,
        }
    }

    /// Serialize to the single-object-per-frame JSON encoding.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
