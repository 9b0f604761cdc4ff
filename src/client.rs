//! Client struct definition
//!
//! Represents a connected client: its identity and where it is in the
//! connection lifecycle. The room never sees this struct, only the
//! [`Member`] built from it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AppError;
use crate::message::ChatMessage;
use crate::session::Identity;
use crate::types::ClientId;

/// Connection lifecycle
///
/// `Connecting → Joined → Active → Leaving → Closed`, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded, waiting for the room to accept the join
    Connecting,
    /// Accepted by the room
    Joined,
    /// Both pumps running
    Active,
    /// Reader pump ended, leave sent
    Leaving,
    /// Room processed the leave and the writer saw its queue close
    Closed,
}

impl ConnectionState {
    /// The only state this one may move to
    pub fn successor(self) -> Option<ConnectionState> {
        match self {
            ConnectionState::Connecting => Some(ConnectionState::Joined),
            ConnectionState::Joined => Some(ConnectionState::Active),
            ConnectionState::Active => Some(ConnectionState::Leaving),
            ConnectionState::Leaving => Some(ConnectionState::Closed),
            ConnectionState::Closed => None,
        }
    }
}

/// Sending half of a member's outbound queue
pub type Outbound = mpsc::Sender<Arc<ChatMessage>>;

/// Receiving half of a member's outbound queue
pub type OutboundRx = mpsc::Receiver<Arc<ChatMessage>>;

/// The room's view of a client
///
/// Holds the only sender of the client's outbound queue, so dropping the
/// member closes the queue.
#[derive(Debug)]
pub struct Member {
    pub id: ClientId,
    pub name: String,
    pub queue: Outbound,
}

/// Connected client information
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Verified identity from the session token
    pub identity: Identity,
    state: ConnectionState,
}

impl Client {
    /// Create a new client in the `Connecting` state
    pub fn new(identity: Identity) -> Self {
        Self {
            id: ClientId::new(),
            identity,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to the next lifecycle state
    ///
    /// Fails if `next` is not the direct successor of the current state.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), AppError> {
        if self.state.successor() != Some(next) {
            return Err(AppError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(client = %self.id, "{:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Build the room member for this client, with a bounded outbound queue
    ///
    /// Returns the member (to hand to the room) and the queue receiver (for
    /// the writer pump).
    pub fn member(&self, capacity: usize) -> (Member, OutboundRx) {
        let (queue, rx) = mpsc::channel(capacity);
        let member = Member {
            id: self.id,
            name: self.identity.name.clone(),
            queue,
        };
        (member, rx)
    }
}
