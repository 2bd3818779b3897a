//! Per-connection WebSocket session.

use super::connection::Connection;
use super::ServerState;
use crate::error::{Error, Result};
use crate::presence;
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Handle a single WebSocket connection until the client goes away.
pub async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let addr = stream.peer_addr()?;
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Everything addressed to this connection goes through its outbox
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn = state.connections.register(tx);
    info!("New connection: {} from {}", conn.id(), addr);

    let conn_id = conn.id().to_string();
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode {} for {}: {}", msg.name(), conn_id, e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(json)).await {
                debug!("Failed to send to {}: {}", conn_id, e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let _ = conn.send(ServerMessage::Welcome {
        id: conn.id().to_string(),
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => dispatch(&state, &conn, msg),
                Err(e) => {
                    warn!("Malformed message from {}: {}", conn.id(), e);
                    let _ = conn.send(ServerMessage::Error {
                        code: ErrorCode::BadRequest,
                        message: e.to_string(),
                    });
                }
            },
            Ok(Message::Close(_)) => {
                debug!("Connection {} closed by client", conn.id());
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error on {}: {}", conn.id(), e);
                break;
            }
        }
    }

    info!("User disconnected: {}", conn.id());
    state.registry.leave(&conn);
    state.connections.remove(conn.id());
    forward_task.abort();

    Ok(())
}

/// Apply one client request. Failures are isolated to the requesting
/// connection and never propagate.
pub fn dispatch(state: &ServerState, conn: &Arc<Connection>, msg: ClientMessage) {
    debug!("{} from {}", msg.name(), conn.id());

    let result = match msg {
        ClientMessage::CreateRoom => {
            let room_id = state.registry.create_room(conn);
            conn.send(ServerMessage::RoomCreated { room_id })
        }
        ClientMessage::JoinRoom {
            room_id,
            display_name,
        } => match state.registry.join_room(conn, &room_id, &display_name) {
            Ok(members) => conn.send(ServerMessage::RoomJoined { room_id, members }),
            Err(Error::RoomNotFound(id)) => {
                info!("{} tried to join unknown room {}", conn.id(), id);
                conn.send(ServerMessage::room_not_found())
            }
            Err(e) => Err(e),
        },
        ClientMessage::LeaveRoom => {
            state.registry.leave(conn);
            Ok(())
        }
        ClientMessage::ChatMessage { room_id, text } => {
            presence::broadcast_chat(&state.registry, conn, &room_id, text)
        }
        direct => state.relay.relay_direct(conn, direct),
    };

    if let Err(e) = result {
        if e.is_benign() {
            debug!("Dropped message from {}: {}", conn.id(), e);
        } else {
            warn!("Request from {} failed: {}", conn.id(), e);
        }
    }
}
