use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Topic the socket itself uses for heartbeats.
pub(crate) const PHOENIX_TOPIC: &str = "phoenix";

/// One frame on the websocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub message_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl RealtimeMessage {
    pub fn new(topic: &str, event: ChannelEvent, payload: Value) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.as_str().to_string(),
            payload,
            message_ref: None,
            join_ref: None,
        }
    }

    pub fn with_ref(mut self, message_ref: String) -> Self {
        self.message_ref = Some(message_ref);
        self
    }

    pub fn with_join_ref(mut self, join_ref: String) -> Self {
        self.join_ref = Some(join_ref);
        self
    }

    /// The protocol event, or `None` for events this client does not model.
    pub fn kind(&self) -> Option<ChannelEvent> {
        ChannelEvent::parse(&self.event)
    }

    /// Status of a `phx_reply`.
    pub fn reply_status(&self) -> Option<ReplyStatus> {
        if self.kind() != Some(ChannelEvent::PhoenixReply) {
            return None;
        }
        let status = self.payload.get("status").and_then(Value::as_str)?;
        Some(if status == "ok" {
            ReplyStatus::Ok
        } else {
            let reason = self
                .payload
                .pointer("/response/reason")
                .and_then(Value::as_str)
                .unwrap_or(status)
                .to_string();
            ReplyStatus::Error(reason)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEvent {
    #[serde(rename = "phx_join")]
    PhoenixJoin,
    #[serde(rename = "phx_reply")]
    PhoenixReply,
    #[serde(rename = "phx_error")]
    PhoenixError,
    #[serde(rename = "phx_close")]
    PhoenixClose,
    #[serde(rename = "phx_leave")]
    PhoenixLeave,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "broadcast")]
    Broadcast,
    #[serde(rename = "system")]
    System,
}

impl ChannelEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelEvent::PhoenixJoin => "phx_join",
            ChannelEvent::PhoenixReply => "phx_reply",
            ChannelEvent::PhoenixError => "phx_error",
            ChannelEvent::PhoenixClose => "phx_close",
            ChannelEvent::PhoenixLeave => "phx_leave",
            ChannelEvent::Heartbeat => "heartbeat",
            ChannelEvent::Broadcast => "broadcast",
            ChannelEvent::System => "system",
        }
    }

    pub fn parse(event: &str) -> Option<Self> {
        serde_json::from_value(Value::String(event.to_string())).ok()
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broadcast as seen by subscribers: the application event name and its
/// JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastEvent {
    pub event: String,
    pub payload: Value,
}

impl BroadcastEvent {
    pub fn new(event: &str, payload: Value) -> Self {
        Self {
            event: event.to_string(),
            payload,
        }
    }

    pub(crate) fn to_wire(&self) -> Value {
        json!({
            "type": "broadcast",
            "event": self.event,
            "payload": self.payload,
        })
    }

    pub(crate) fn from_wire(payload: &Value) -> Option<Self> {
        let event = payload.get("event").and_then(Value::as_str)?;
        Some(Self {
            event: event.to_string(),
            payload: payload.get("payload").cloned().unwrap_or(Value::Null),
        })
    }
}
