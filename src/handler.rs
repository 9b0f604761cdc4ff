//! WebSocket connection handler
//!
//! Runs one admitted connection: registers the client with the room, then
//! moves frames between the transport and the room with two pumps.
//! The reader runs on the calling task and the writer on its own task.

use std::fmt::Display;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::client::{Client, ConnectionState, Member, OutboundRx};
use crate::error::AppError;
use crate::message::{ChatMessage, InboundFrame};
use crate::room::RoomHandle;
use crate::session::Identity;
use crate::types::ClientId;

/// Sends exactly one leave for a client when dropped
///
/// Armed before the join is sent, so every way out of [`serve_client`]
/// (return, error, panic, cancellation mid-join) removes the client. A leave
/// for a client the room never added is a no-op there.
struct LeaveGuard {
    room: RoomHandle,
    id: ClientId,
}

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        self.room.leave_detached(self.id);
    }
}

/// Join the room and return the guard that will leave it
async fn enter(room: &RoomHandle, member: Member) -> Result<LeaveGuard, AppError> {
    let guard = LeaveGuard {
        room: room.clone(),
        id: member.id,
    };
    room.join(member).await?;
    Ok(guard)
}

/// Serve an upgraded connection for its whole lifetime
///
/// Blocks on the room's join acceptance, starts the writer pump, runs the
/// reader pump until the transport ends, then leaves the room and waits for
/// the writer to drain.
pub async fn serve_client(
    socket: WebSocket,
    identity: Identity,
    room: RoomHandle,
    queue_capacity: usize,
) -> Result<(), AppError> {
    let mut client = Client::new(identity);
    let (member, queue) = client.member(queue_capacity);

    let leave = enter(&room, member).await?;
    client.advance(ConnectionState::Joined)?;
    info!(client = %client.id, "{} joined", client.identity.name);

    let (ws_sender, ws_receiver) = socket.split();
    let write_task = tokio::spawn(write_pump(client.id, queue, ws_sender));
    client.advance(ConnectionState::Active)?;

    let result = read_pump(&client, ws_receiver, &room).await;

    client.advance(ConnectionState::Leaving)?;
    drop(leave);

    // The room closes the queue when it processes the leave.
    if let Err(e) = write_task.await {
        error!(client = %client.id, "Write task failed: {}", e);
    }
    client.advance(ConnectionState::Closed)?;
    info!(client = %client.id, "{} disconnected", client.identity.name);

    result
}

/// Reader pump: transport → room
///
/// Returns when the peer closes or the transport fails. Frames that are not
/// valid chat JSON are logged and skipped.
async fn read_pump<St>(
    client: &Client,
    mut ws_receiver: St,
    room: &RoomHandle,
) -> Result<(), AppError>
where
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match InboundFrame::parse(text.as_str()) {
                Ok(frame) => {
                    let message = ChatMessage::new(&client.identity, frame.message);
                    room.forward(message).await?;
                }
                Err(e) => {
                    warn!(client = %client.id, "Invalid frame: {}", e);
                }
            },
            Ok(Message::Close(_)) => {
                debug!(client = %client.id, "Client sent close frame");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pong is handled automatically by axum
            }
            Ok(Message::Binary(_)) => {}
            Err(e) => {
                warn!(client = %client.id, "WebSocket read error: {}", e);
                return Err(e.into());
            }
        }
    }
    debug!(client = %client.id, "Read pump ended");
    Ok(())
}

/// Writer pump: outbound queue → transport
///
/// Ends when the room closes the queue (after it is drained) or a write
/// fails, then closes the outbound side of the transport.
async fn write_pump<Si>(id: ClientId, mut queue: OutboundRx, mut ws_sender: Si)
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    while let Some(msg) = queue.recv().await {
        match msg.to_json() {
            Ok(json) => {
                if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                    debug!(client = %id, "WebSocket send failed, ending write pump: {}", e);
                    break;
                }
            }
            Err(e) => {
                // Continue - don't break on serialization errors
                error!(client = %id, "Failed to serialize message: {}", e);
            }
        }
    }
    debug!(client = %id, "Write pump ended");

    let _ = ws_sender.close().await;
}
