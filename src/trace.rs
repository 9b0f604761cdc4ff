//! Room trace sink
//!
//! An append-only record of what the room actor did, for diagnostics only.
//! The room owns its tracer, so implementations take `&mut self` and need no
//! locking of their own.

use std::fmt;
use std::io::Write;

use crate::types::ClientId;

/// A single room event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Client added to the room
    Joined(ClientId),
    /// Join for a client that is already a member (ignored)
    AlreadyMember(ClientId),
    /// Client removed and its queue closed
    Left(ClientId),
    /// Leave for a client that is not a member (ignored)
    NotMember(ClientId),
    /// Message received for fan-out
    Received { body: String },
    /// Message queued for a member
    Delivered(ClientId),
    /// Member's queue was full or closed; member removed
    Evicted(ClientId),
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Joined(id) => write!(f, "client {} joined", id),
            TraceEvent::AlreadyMember(id) => write!(f, "client {} already joined", id),
            TraceEvent::Left(id) => write!(f, "client {} left", id),
            TraceEvent::NotMember(id) => write!(f, "client {} not in room", id),
            TraceEvent::Received { body } => write!(f, "message received: {}", body),
            TraceEvent::Delivered(id) => write!(f, " -- sent to client {}", id),
            TraceEvent::Evicted(id) => write!(f, " -- failed to send, evicting client {}", id),
        }
    }
}

/// Destination for room events
pub trait Tracer: Send {
    fn trace(&mut self, event: &TraceEvent);
}

/// Tracer that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct Off;

impl Tracer for Off {
    fn trace(&mut self, _event: &TraceEvent) {}
}

/// Tracer that forwards events to the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn trace(&mut self, event: &TraceEvent) {
        tracing::info!(target: "chat_room::trace", "{}", event);
    }
}

/// Tracer that appends one line per event to a writer
pub struct WriterTracer<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> WriterTracer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Tracer for WriterTracer<W> {
    fn trace(&mut self, event: &TraceEvent) {
        // A failed write is dropped; the room carries on.
        if let Err(e) = writeln!(self.out, "{}", event) {
            tracing::debug!("trace write failed: {}", e);
        }
    }
}
