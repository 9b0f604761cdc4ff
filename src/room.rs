//! Room actor implementation
//!
//! The room is the single owner of the member set. Connection handlers talk
//! to it only through [`RoomHandle`], and each command is processed to
//! completion before the next one is taken, so no locks are needed.
//!
//! Fan-out never blocks: a member whose queue is full or closed is evicted
//! on the spot and everyone else still gets the message.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::Member;
use crate::error::AppError;
use crate::message::ChatMessage;
use crate::trace::{TraceEvent, Tracer};
use crate::types::ClientId;

/// Commands sent from connection handlers to the room actor
#[derive(Debug)]
pub enum RoomCommand {
    /// Add a member; `ack` fires once the room has accepted it
    Join {
        member: Member,
        ack: oneshot::Sender<()>,
    },
    /// Remove a member and close its queue
    Leave { id: ClientId },
    /// Broadcast a message to every member
    Forward { message: Arc<ChatMessage> },
}

/// Outcome of one fan-out
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ForwardReport {
    /// Members the message was queued for
    pub delivered: usize,
    /// Members removed because their queue was full or closed
    pub evicted: Vec<ClientId>,
}

/// Cloneable handle to a running room
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Register a member, waiting until the room loop has accepted it
    ///
    /// The wait is the admission throttle: joins go no faster than the
    /// room processes them.
    pub async fn join(&self, member: Member) -> Result<(), AppError> {
        let (ack, accepted) = oneshot::channel();
        self.send(RoomCommand::Join { member, ack }).await?;
        accepted.await.map_err(|_| AppError::RoomClosed)
    }

    /// Ask the room to remove a member
    pub async fn leave(&self, id: ClientId) -> Result<(), AppError> {
        self.send(RoomCommand::Leave { id }).await
    }

    /// Queue a leave without awaiting, for use from `Drop`
    ///
    /// Falls back to a spawned send when the mailbox is full. If the room is
    /// gone there is nothing to leave.
    pub fn leave_detached(&self, id: ClientId) {
        match self.sender.try_send(RoomCommand::Leave { id }) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {
                debug!(client = %id, "Room closed, leave dropped");
            }
            Err(TrySendError::Full(cmd)) => match Handle::try_current() {
                Ok(runtime) => {
                    let sender = self.sender.clone();
                    runtime.spawn(async move {
                        let _ = sender.send(cmd).await;
                    });
                }
                Err(_) => warn!(client = %id, "No runtime to deliver leave"),
            },
        }
    }

    /// Hand a message to the room for broadcast
    pub async fn forward(&self, message: ChatMessage) -> Result<(), AppError> {
        self.send(RoomCommand::Forward {
            message: Arc::new(message),
        })
        .await
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), AppError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| AppError::RoomClosed)
    }
}

/// The room actor
///
/// Owns all members. Nothing outside [`Room::run`] reads or writes the map.
pub struct Room {
    /// Current members: ClientId -> Member
    members: HashMap<ClientId, Member>,
    /// Diagnostic event sink
    tracer: Box<dyn Tracer>,
}

impl Room {
    /// Create an empty room
    pub fn new(tracer: Box<dyn Tracer>) -> Self {
        Self {
            members: HashMap::new(),
            tracer,
        }
    }

    /// Spawn the room loop and return a handle to it
    ///
    /// `capacity` bounds the command mailbox; senders wait when it is full.
    pub fn start(self, capacity: usize) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let task = tokio::spawn(self.run(receiver));
        (RoomHandle { sender }, task)
    }

    /// Run the room event loop
    ///
    /// Processes commands until every handle has been dropped, then closes
    /// the queues of any remaining members.
    pub async fn run(mut self, mut receiver: mpsc::Receiver<RoomCommand>) {
        info!("Room started");

        while let Some(cmd) = receiver.recv().await {
            self.handle_command(cmd);
        }

        let remaining = self.members.len();
        self.members.clear();
        info!("Room shutting down, closed {} member queues", remaining);
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join { member, ack } => {
                let id = member.id;
                let added = self.join(member);
                // Joiner gave up while waiting; undo only what this join did.
                if ack.send(()).is_err() && added {
                    debug!(client = %id, "Joiner went away before acceptance");
                    self.leave(id);
                }
            }
            RoomCommand::Leave { id } => self.leave(id),
            RoomCommand::Forward { message } => {
                self.forward(message);
            }
        }
    }

    /// Add a member; a second join for the same id is ignored
    ///
    /// Returns whether the member was added.
    pub fn join(&mut self, member: Member) -> bool {
        let id = member.id;
        if self.members.contains_key(&id) {
            self.tracer.trace(&TraceEvent::AlreadyMember(id));
            return false;
        }

        info!(client = %id, "{} joined the room", member.name);
        self.members.insert(id, member);
        self.tracer.trace(&TraceEvent::Joined(id));
        debug!("Total members: {}", self.members.len());
        true
    }

    /// Remove a member and close its queue; unknown ids are ignored
    pub fn leave(&mut self, id: ClientId) {
        match self.members.remove(&id) {
            Some(member) => {
                info!(client = %id, "{} left the room", member.name);
                // Dropping the only sender closes the queue.
                drop(member);
                self.tracer.trace(&TraceEvent::Left(id));
                debug!("Total members: {}", self.members.len());
            }
            None => self.tracer.trace(&TraceEvent::NotMember(id)),
        }
    }

    /// Queue `message` for every member without blocking
    ///
    /// Members whose queue rejects the message are evicted.
    pub fn forward(&mut self, message: Arc<ChatMessage>) -> ForwardReport {
        self.tracer.trace(&TraceEvent::Received {
            body: message.body.clone(),
        });

        let mut report = ForwardReport::default();
        for (id, member) in &self.members {
            match member.queue.try_send(Arc::clone(&message)) {
                Ok(()) => {
                    report.delivered += 1;
                    self.tracer.trace(&TraceEvent::Delivered(*id));
                }
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                    report.evicted.push(*id);
                    self.tracer.trace(&TraceEvent::Evicted(*id));
                }
            }
        }

        for id in &report.evicted {
            if let Some(member) = self.members.remove(id) {
                info!(client = %id, "{} evicted (slow or gone)", member.name);
            }
        }

        report
    }

    /// Number of current members
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a client is currently a member
    pub fn is_member(&self, id: ClientId) -> bool {
        self.members.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    use tokio::sync::mpsc::error::TryRecvError;

    use crate::client::{Client, OutboundRx};
    use crate::session::Identity;
    use crate::trace::Off;

    fn client(name: &str) -> Client {
        Client::new(Identity::new(name, "x@example.com", "//img/x.png"))
    }

    fn member(name: &str, capacity: usize) -> (ClientId, Member, OutboundRx) {
        let c = client(name);
        let (member, rx) = c.member(capacity);
        (c.id, member, rx)
    }

    fn msg(body: &str) -> Arc<ChatMessage> {
        let identity = Identity::new("Sender", "s@example.com", "");
        Arc::new(ChatMessage::new(&identity, body.to_string()))
    }

    fn drain(rx: &mut OutboundRx) -> Vec<String> {
        let mut bodies = Vec::new();
        while let Ok(m) = rx.try_recv() {
            bodies.push(m.body.clone());
        }
        bodies
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_membership_after_joins_and_leaves() {
        let mut room = Room::new(Box::new(Off));
        let (a, ma, _ra) = member("A", 4);
        let (b, mb, _rb) = member("B", 4);
        let (c, mc, _rc) = member("C", 4);

        room.join(ma);
        room.join(mb);
        room.join(mc);
        room.leave(b);

        assert_eq!(room.member_count(), 2);
        assert!(room.is_member(a));
        assert!(!room.is_member(b));
        assert!(room.is_member(c));

        // Leaving a non-member is a no-op
        room.leave(b);
        room.leave(ClientId::new());
        assert_eq!(room.member_count(), 2);
    }

    #[test]
    fn test_duplicate_join_not_duplicated() {
        let mut room = Room::new(Box::new(Off));
        let c = client("A");
        let (first, mut first_rx) = c.member(4);
        let (second, _second_rx) = c.member(4);

        assert!(room.join(first));
        assert!(!room.join(second));
        assert_eq!(room.member_count(), 1);

        let report = room.forward(msg("hi"));
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut first_rx), vec!["hi"]);
    }

    #[test]
    fn test_forward_reaches_every_member() {
        let mut room = Room::new(Box::new(Off));
        let mut receivers = Vec::new();
        for name in ["A", "B", "C"] {
            let (_, m, rx) = member(name, 4);
            room.join(m);
            receivers.push(rx);
        }

        let report = room.forward(msg("hello"));
        assert_eq!(report.delivered, 3);
        assert!(report.evicted.is_empty());
        for rx in &mut receivers {
            assert_eq!(drain(rx), vec!["hello"]);
        }
    }

    #[test]
    fn test_forward_order_preserved() {
        let mut room = Room::new(Box::new(Off));
        let (_, ma, mut ra) = member("A", 8);
        let (_, mb, mut rb) = member("B", 8);
        room.join(ma);
        room.join(mb);

        room.forward(msg("f1"));
        room.forward(msg("f2"));

        assert_eq!(drain(&mut ra), vec!["f1", "f2"]);
        assert_eq!(drain(&mut rb), vec!["f1", "f2"]);
    }

    #[test]
    fn test_full_queue_evicts_only_that_member() {
        let mut room = Room::new(Box::new(Off));
        let (a, ma, mut ra) = member("A", 8);
        let (b, mb, mut rb) = member("B", 1);
        room.join(ma);
        room.join(mb);

        room.forward(msg("one"));
        let report = room.forward(msg("two"));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, vec![b]);
        assert!(room.is_member(a));
        assert!(!room.is_member(b));
        assert_eq!(drain(&mut ra), vec!["one", "two"]);

        // B's queue is closed: buffered message then end of stream
        assert_eq!(drain(&mut rb), vec!["one"]);
        assert_eq!(rb.try_recv().unwrap_err(), TryRecvError::Disconnected);
    }

    #[test]
    fn test_closed_queue_evicts_member() {
        let mut room = Room::new(Box::new(Off));
        let (a, ma, ra) = member("A", 4);
        room.join(ma);
        drop(ra);

        let report = room.forward(msg("hi"));
        assert_eq!(report.evicted, vec![a]);
        assert_eq!(room.member_count(), 0);
    }

    #[test]
    fn test_join_then_leave_closes_queue_once() {
        let mut room = Room::new(Box::new(Off));
        let (a, ma, mut ra) = member("A", 4);
        room.join(ma);
        room.leave(a);
        room.leave(a);

        assert_eq!(ra.try_recv().unwrap_err(), TryRecvError::Disconnected);
        assert_eq!(room.member_count(), 0);
    }

    #[test]
    fn test_sender_receives_own_message() {
        let mut room = Room::new(Box::new(Off));
        let alice = client("Alice");
        let (m, mut rx) = alice.member(4);
        room.join(m);

        room.forward(Arc::new(ChatMessage::new(&alice.identity, "echo".to_string())));
        let got = rx.try_recv().unwrap();
        assert_eq!(got.sender_name, "Alice");
        assert_eq!(got.body, "echo");
    }

    #[test]
    fn test_trace_events_recorded() {
        let buf = SharedBuf::default();
        let mut room = Room::new(Box::new(crate::trace::WriterTracer::new(buf.clone())));
        let (a, ma, _ra) = member("A", 1);
        room.join(ma);
        room.forward(msg("x"));
        room.forward(msg("y"));
        room.leave(a);

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("client {} joined", a),
                "message received: x".to_string(),
                format!(" -- sent to client {}", a),
                "message received: y".to_string(),
                format!(" -- failed to send, evicting client {}", a),
                format!("client {} not in room", a),
            ]
        );
    }

    #[test]
    fn test_abandoned_join_is_undone() {
        let mut room = Room::new(Box::new(Off));
        let (a, ma, mut ra) = member("A", 4);
        let (ack, accepted) = oneshot::channel();
        drop(accepted);

        room.handle_command(RoomCommand::Join { member: ma, ack });
        assert!(!room.is_member(a));
        assert_eq!(ra.try_recv().unwrap_err(), TryRecvError::Disconnected);
    }

    #[test]
    fn test_abandoned_duplicate_join_keeps_member() {
        let mut room = Room::new(Box::new(Off));
        let c = client("A");
        let (first, mut first_rx) = c.member(4);
        let (second, _second_rx) = c.member(4);
        room.join(first);

        let (ack, accepted) = oneshot::channel();
        drop(accepted);
        room.handle_command(RoomCommand::Join { member: second, ack });

        assert!(room.is_member(c.id));
        room.forward(msg("still here"));
        assert_eq!(drain(&mut first_rx), vec!["still here"]);
    }

    #[tokio::test]
    async fn test_leave_detached_waits_for_mailbox_space() {
        let (sender, receiver) = mpsc::channel(1);
        let handle = RoomHandle { sender };
        let mut room = Room::new(Box::new(Off));
        let (a, ma, mut ra) = member("A", 4);
        room.join(ma);

        // Mailbox is full, so the leave has to go through a spawned send.
        handle
            .forward(ChatMessage::new(&Identity::new("S", "", ""), "first".to_string()))
            .await
            .unwrap();
        handle.leave_detached(a);

        let task = tokio::spawn(room.run(receiver));
        assert_eq!(ra.recv().await.unwrap().body, "first");
        assert!(ra.recv().await.is_none());

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_join_waits_for_acceptance() {
        let (room, task) = Room::new(Box::new(Off)).start(8);
        let (a, ma, mut ra) = member("A", 4);

        room.join(ma).await.unwrap();
        room.forward(ChatMessage::new(&Identity::new("A", "", ""), "hi".to_string()))
            .await
            .unwrap();
        assert_eq!(ra.recv().await.unwrap().body, "hi");

        room.leave(a).await.unwrap();
        assert!(ra.recv().await.is_none());

        drop(room);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_remaining_queues() {
        let (room, task) = Room::new(Box::new(Off)).start(8);
        let (_, ma, mut ra) = member("A", 4);
        room.join(ma).await.unwrap();

        drop(room);
        task.await.unwrap();
        assert!(ra.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_handle_fails_after_room_stopped() {
        let (room, task) = Room::new(Box::new(Off)).start(8);
        task.abort();
        let _ = task.await;

        let (_, ma, _ra) = member("A", 4);
        assert!(matches!(room.join(ma).await, Err(AppError::RoomClosed)));
    }
}
