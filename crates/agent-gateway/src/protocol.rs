//! Wire frames exchanged with the gateway over WebSocket.
//!
//! Every frame is a JSON text message with a `type` tag. Outbound frames are
//! strongly typed; inbound frames are decoded loosely into [`InboundFrame`]
//! and then classified, because gateway builds disagree on the exact tag and
//! field names they use for streamed content. Payload fields may hold a plain
//! string, an object with a `text` or `message` member, or an array of such
//! parts.
//!
//! ```text
//! client                                   gateway
//!   │ ── {"type":"connect","token":…} ──────▶ │
//!   │ ◀───────────────── {"type":"connected"} │
//!   │ ── {"type":"agent","message":…} ──────▶ │
//!   │ ◀──────── {"type":"content","content":…} │  (0..n)
//!   │ ◀──────────────────── {"type":"done"} ── │  or {"type":"error"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame<'a> {
    /// Handshake carrying the bearer token.
    Connect { token: &'a str, client: &'a str },
    /// The single agent request of an exchange.
    Agent {
        #[serde(rename = "agentId")]
        agent_id: &'a str,
        #[serde(rename = "sessionKey")]
        session_key: &'a str,
        message: &'a str,
    },
}

impl OutboundFrame<'_> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A frame received from the gateway, before classification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub text: Option<Value>,
    #[serde(default)]
    pub delta: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Flatten a payload value into text.
///
/// Arrays concatenate their parts; objects yield their `text`, `content` or
/// `message` member, falling back to the raw JSON.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(parts.iter().filter_map(text_of).collect()),
        Value::Object(obj) => ["text", "content", "message"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(text_of))
            .or_else(|| Some(value.to_string())),
        other => Some(other.to_string()),
    }
}

/// What an inbound frame means for the exchange in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Handshake acknowledged; the request may be sent.
    Ack,
    /// A fragment to append to the response buffer.
    Content(String),
    /// Terminal success, optionally carrying final text.
    Done(Option<String>),
    /// Terminal failure with the gateway's message.
    Error(String),
    /// Anything else (heartbeats, presence, tool events…).
    Other(String),
}

impl InboundFrame {
    /// The frame's text payload, whichever field carried it.
    fn payload(&self) -> Option<String> {
        [&self.content, &self.text, &self.delta, &self.message]
            .into_iter()
            .flatten()
            .find_map(text_of)
    }

    pub fn classify(&self) -> FrameKind {
        match self.kind.to_ascii_lowercase().as_str() {
            "connected" | "hello" | "hello-ok" | "ready" | "ack" => FrameKind::Ack,
            "content" | "chunk" | "delta" | "text" | "message" => {
                FrameKind::Content(self.payload().unwrap_or_default())
            }
            "done" | "complete" | "completed" | "end" => FrameKind::Done(self.payload()),
            "error" => FrameKind::Error(self.error_message()),
            other => FrameKind::Other(other.to_string()),
        }
    }

    fn error_message(&self) -> String {
        [&self.error, &self.message]
            .into_iter()
            .flatten()
            .find_map(text_of)
            .unwrap_or_else(|| "unknown gateway error".to_string())
    }
}
