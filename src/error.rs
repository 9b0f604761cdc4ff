//! Error types for the chat server
//!
//! Defines connection-level errors plus the narrower errors of the
//! session codec, identity providers, avatar resolution and configuration.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Every variant is scoped to a single request or connection. None of them
/// is allowed to take down the room or other clients.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The room actor has stopped and no longer accepts commands
    #[error("Room closed")]
    RoomClosed,

    /// Session token could not be decoded
    #[error("Invalid session: {0}")]
    Session(#[from] SessionError),

    /// Identity provider or credential failure
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Avatar URL could not be resolved
    #[error("Avatar error: {0}")]
    Avatar(#[from] AvatarError),

    /// Connection lifecycle moved out of order
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::client::ConnectionState,
        to: crate::client::ConnectionState,
    },
}

/// Session token decoding errors
///
/// Decoding either yields a complete record or one of these; there is no
/// partially decoded session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("token is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("token payload is malformed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unsupported session version {0}")]
    UnsupportedVersion(u32),

    #[error("session field '{0}' is empty")]
    EmptyField(&'static str),

    #[error("session user id does not match name")]
    UserIdMismatch,
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Cookie header present but not readable
    #[error("malformed cookie header")]
    MalformedCookie,

    /// No provider registered under this name
    #[error("unknown auth provider: {0}")]
    UnknownProvider(String),

    /// Provider refused or could not complete the exchange
    #[error("provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },
}

/// Avatar resolution errors
#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("no avatar URL available")]
    NoAvatarUrl,
}

/// Configuration errors (start-up only)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
