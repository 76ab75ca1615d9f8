//! Envelope types exchanged over the TARS channel socket.
//!
//! Every frame on the wire is a single JSON object whose `type` field names
//! the envelope:
//!
//! ```text
//! peer -> bridge   {"type":"input","text":"..."}
//! bridge -> peer   {"type":"message","text":"...","timestamp":1700000000000}
//! ```
//!
//! Unknown fields are tolerated on decode so that peers can attach extra
//! metadata without breaking older bridges.

use serde::{Deserialize, Serialize};

/// Text typed or spoken at the display, sent to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub text: String,
}

impl InboundMessage {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Text produced by the host, broadcast to every connected display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    /// Milliseconds since the Unix epoch at construction time.
    pub timestamp: i64,
}

impl OutboundMessage {
    /// Create a message stamped with the current wall-clock time.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_timestamp(text, now_millis())
    }

    #[must_use]
    pub fn with_timestamp(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            text: text.into(),
            timestamp,
        }
    }
}

/// A decoded frame, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Input(InboundMessage),
    Message(OutboundMessage),
}

impl Envelope {
    /// The `type` discriminator as it appears on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Input(_) => "input",
            Envelope::Message(_) => "message",
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Envelope::Input(msg) => &msg.text,
            Envelope::Message(msg) => &msg.text,
        }
    }
}

impl From<InboundMessage> for Envelope {
    fn from(msg: InboundMessage) -> Self {
        Envelope::Input(msg)
    }
}

impl From<OutboundMessage> for Envelope {
    fn from(msg: OutboundMessage) -> Self {
        Envelope::Message(msg)
    }
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
