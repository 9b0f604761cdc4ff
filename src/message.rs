//! Message protocol definitions
//!
//! JSON text frames in both directions. Clients send only the message body;
//! the server stamps sender and time before broadcasting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Identity;

/// Client → Server frame
///
/// `message` is the field name browsers send; `body` is accepted too.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(alias = "body")]
    pub message: String,
}

impl InboundFrame {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A broadcast chat message
///
/// Immutable once built; the room shares one allocation across all members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_name: String,
    pub avatar_url: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a message sent now by `identity`
    pub fn new(identity: &Identity, body: String) -> Self {
        Self::at(identity, body, Utc::now())
    }

    /// Build a message with an explicit timestamp
    pub fn at(identity: &Identity, body: String, sent_at: DateTime<Utc>) -> Self {
        Self {
            sender_name: identity.name.clone(),
            avatar_url: identity.avatar_url.clone(),
            body,
            sent_at,
        }
    }

    /// Serialize into a text frame payload
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
