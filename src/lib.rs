//! WebSocket Group Chat Room Library
//!
//! A single chat room served over WebSocket with axum, behind a
//! cookie-based sign-in flow.
//!
//! # Features
//! - Sign-in through pluggable identity providers
//! - Session cookie carrying a verified identity
//! - One shared room: every message goes to every member, sender included
//! - Slow or dead clients are evicted without stalling the others
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Room` is the actor owning the member set
//! - Each connection has a reader pump (transport → room) and a writer
//!   pump (its own bounded queue → transport)
//! - No locks needed - membership is only touched by the room task
//!
//! # Example
//! ```ignore
//! use chat_room::{ChatServer, ProviderRegistry, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default().dev_auth(true);
//!     let server = ChatServer::new(config, ProviderRegistry::new());
//!     server.run().await.unwrap();
//! }
//! ```

pub mod auth;
pub mod avatar;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod room;
pub mod server;
pub mod session;
pub mod trace;
pub mod types;

// Re-export main types for convenience
pub use auth::{IdentityProvider, ProviderRegistry, VerifiedUser};
pub use avatar::{AvatarResolver, AvatarStyle};
pub use client::{Client, ConnectionState, Member};
pub use config::ServerConfig;
pub use error::{AppError, AuthError, AvatarError, ConfigError, SessionError};
pub use handler::serve_client;
pub use message::ChatMessage;
pub use room::{ForwardReport, Room, RoomCommand, RoomHandle};
pub use server::ChatServer;
pub use session::{Identity, SessionRecord};
pub use trace::{LogTracer, Off, TraceEvent, Tracer, WriterTracer};
pub use types::{ClientId, UserId};
