//! Session codec
//!
//! The session token is the client-held credential: a versioned, fixed-schema
//! record serialized as JSON and wrapped in URL-safe base64 so it can travel
//! in a cookie. Decoding validates every field before producing an
//! [`Identity`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::types::UserId;

/// Current session schema version
pub const SESSION_VERSION: u32 = 1;

/// On-the-wire session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionRecord {
    pub v: u32,
    pub user_id: String,
    pub name: String,
    pub avatar_url: String,
    pub email: String,
}

impl SessionRecord {
    /// Build a record for a verified user, deriving the user ID from the name
    pub fn new(name: &str, email: &str, avatar_url: &str) -> Self {
        Self {
            v: SESSION_VERSION,
            user_id: UserId::from_name(name).0,
            name: name.to_string(),
            avatar_url: avatar_url.to_string(),
            email: email.to_string(),
        }
    }

    fn validate(self) -> Result<Self, SessionError> {
        if self.v != SESSION_VERSION {
            return Err(SessionError::UnsupportedVersion(self.v));
        }
        if self.user_id.is_empty() {
            return Err(SessionError::EmptyField("user_id"));
        }
        if self.name.trim().is_empty() {
            return Err(SessionError::EmptyField("name"));
        }
        if UserId::from_name(&self.name).0 != self.user_id {
            return Err(SessionError::UserIdMismatch);
        }
        Ok(self)
    }
}

/// Verified identity of a connected user
///
/// Produced once when the session is decoded and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub name: String,
    pub avatar_url: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: &str, email: &str, avatar_url: &str) -> Self {
        Self {
            user_id: UserId::from_name(name),
            name: name.to_string(),
            avatar_url: avatar_url.to_string(),
            email: email.to_string(),
        }
    }

    /// Replace the avatar URL, consuming the identity
    pub fn with_avatar_url(self, avatar_url: String) -> Self {
        Self { avatar_url, ..self }
    }
}

impl From<SessionRecord> for Identity {
    fn from(record: SessionRecord) -> Self {
        Self {
            user_id: UserId(record.user_id),
            name: record.name,
            avatar_url: record.avatar_url,
            email: record.email,
        }
    }
}

/// Encode a session record into an opaque token
pub fn encode(record: &SessionRecord) -> Result<String, SessionError> {
    let json = serde_json::to_vec(record)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode and validate a session token
pub fn decode(token: &str) -> Result<SessionRecord, SessionError> {
    let bytes = URL_SAFE_NO_PAD.decode(token.trim())?;
    let record: SessionRecord = serde_json::from_slice(&bytes)?;
    record.validate()
}

/// Decode a session token straight into an identity
pub fn decode_identity(token: &str) -> Result<Identity, SessionError> {
    decode(token).map(Identity::from)
}
