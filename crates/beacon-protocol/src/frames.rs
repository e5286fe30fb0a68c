//! Envelope types for the Beacon wire protocol.
//!
//! Every WebSocket frame carries exactly one JSON object of the shape
//! `{"type": string, "data"?: any, "ic"?: string}`. Broadcasts always travel
//! as `hello`; the real event kind lives in `data.status`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Envelope type names known to the hub.
///
/// Anything else decodes to [`FrameType::Unknown`] so callers can ignore it
/// instead of rejecting the frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Server-to-client broadcast of a backend event.
    Hello,
    /// Client keepalive.
    Ping,
    /// Server reply to a keepalive.
    Pong,
    /// Client-originated event to relay to every dashboard.
    Message,
    /// Any other type name.
    Unknown(String),
}

impl FrameType {
    /// Wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            FrameType::Hello => "hello",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
            FrameType::Message => "message",
            FrameType::Unknown(name) => name,
        }
    }
}

impl From<&str> for FrameType {
    fn from(name: &str) -> Self {
        match name {
            "hello" => FrameType::Hello,
            "ping" => FrameType::Ping,
            "pong" => FrameType::Pong,
            "message" => FrameType::Message,
            other => FrameType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single wire frame.
///
/// Envelopes are built once by a producer and never mutated on the way to
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope type name.
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// IC card serial, sent by NFC-capable dashboards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ic: Option<String>,
}

impl Envelope {
    /// Create an envelope with only a type name.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            ic: None,
        }
    }

    /// Create the broadcast envelope `{type:"hello", data}`.
    #[must_use]
    pub fn hello(data: Value) -> Self {
        Self::new(FrameType::Hello.as_str()).with_data(data)
    }

    /// Create a keepalive ping.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(FrameType::Ping.as_str())
    }

    /// Create a keepalive pong.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(FrameType::Pong.as_str())
    }

    /// Create a client relay message.
    #[must_use]
    pub fn message(data: Value) -> Self {
        Self::new(FrameType::Message.as_str()).with_data(data)
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach an IC card serial.
    #[must_use]
    pub fn with_ic(mut self, ic: impl Into<String>) -> Self {
        self.ic = Some(ic.into());
        self
    }

    /// Classify the envelope type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        FrameType::from(self.kind.as_str())
    }
}
