//! Control messages posted to a worker by its clients.

use serde::Serialize;
use serde_json::Value;

/// Recognized control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting worker now instead of waiting for clients to
    /// go away.
    SkipWaiting,
}

impl ControlMessage {
    /// Recognize a message payload. Anything that is not an object with a
    /// known `type` yields `None`.
    pub fn parse(data: &Value) -> Option<Self> {
        match data.get("type").and_then(Value::as_str)? {
            "SKIP_WAITING" => Some(ControlMessage::SkipWaiting),
            _ => None,
        }
    }

    /// Recognize a raw JSON payload.
    pub fn parse_str(raw: &str) -> Option<Self> {
        serde_json::from_str::<Value>(raw)
            .ok()
            .as_ref()
            .and_then(Self::parse)
    }

    /// Payload a client posts to send this message.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
