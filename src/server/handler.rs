use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::messages::{ErrorMessage, PongMessage, ReceivedMessage, SendMessage};
use crate::server::room::{Room, RoomRegistry};

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<RoomRegistry>>,
) -> Response {
    info!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Handle one WebSocket connection for its whole lifetime.
///
/// The first frame must be a join; afterwards the connection can switch
/// rooms with further join frames without dropping the transport. Explicit
/// leave frames and transport closure take the same cleanup path.
async fn handle_socket(socket: WebSocket, registry: Arc<RoomRegistry>) {
    // Unique connection ID to identify this client; awareness is keyed per
    // connection, so two tabs of one user are two peers.
    let conn_id = Uuid::new_v4().to_string();
    info!("WebSocket connection established with connection_id: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();

    // Writer task fed by an unbounded channel, so room broadcasts never
    // await this connection's socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<SendMessage>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outbound frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut current_room: Option<Arc<Mutex<Room>>> = None;

    while let Some(Ok(frame)) = receiver.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let parsed: ReceivedMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Invalid frame from connection {}: {}", conn_id, e);
                let _ = tx.send(SendMessage::Error(ErrorMessage {
                    code: 400,
                    message: format!("Invalid frame: {}", e),
                }));
                break;
            }
        };

        match parsed {
            ReceivedMessage::Join(join) => {
                if join.room_id.trim().is_empty() {
                    warn!("Join without room id from connection {}", conn_id);
                    let _ = tx.send(SendMessage::Error(ErrorMessage {
                        code: 400,
                        message: "roomId is required".to_string(),
                    }));
                    break;
                }

                // Room switch: unbind from the previous room, keep the
                // transport and peer identity.
                if let Some(room) = current_room.take() {
                    room.lock().await.leave(&conn_id, registry.now());
                }

                match registry
                    .join_connection(&conn_id, &tx, &join.room_id, join.document_id, &join.peer)
                    .await
                {
                    Ok((room, init)) => {
                        current_room = Some(room);
                        let _ = tx.send(SendMessage::Init(init));
                    }
                    Err(e) => {
                        error!("Join failed for room {}: {}", join.room_id, e);
                        let _ = tx.send(SendMessage::Error(ErrorMessage {
                            code: 500,
                            message: format!("Failed to join room: {}", e),
                        }));
                        break;
                    }
                }
            }
            ReceivedMessage::Update(update) => match &current_room {
                Some(room) => {
                    let result =
                        room.lock()
                            .await
                            .handle_update(&conn_id, update, registry.now());
                    if let Err(e) = result {
                        // Bad data from one peer must not crash the room for
                        // the others; only the sender hears about it.
                        let _ = tx.send(SendMessage::Error(ErrorMessage {
                            code: 422,
                            message: e.to_string(),
                        }));
                    }
                }
                None => {
                    let _ = tx.send(SendMessage::Error(ErrorMessage {
                        code: 409,
                        message: "Must join a room before sending updates".to_string(),
                    }));
                }
            },
            ReceivedMessage::Awareness(awareness) => {
                if let Some(room) = &current_room {
                    room.lock()
                        .await
                        .handle_awareness(&conn_id, awareness.state);
                }
            }
            ReceivedMessage::Ping(ping) => {
                if let Some(room) = &current_room {
                    room.lock().await.presence.touch(&ping.peer, registry.now());
                }
                let _ = tx.send(SendMessage::Pong(PongMessage {
                    date: registry.now().to_rfc3339(),
                }));
            }
            ReceivedMessage::Leave(_) => break,
        }
    }

    if let Some(room) = current_room {
        room.lock().await.leave(&conn_id, registry.now());
    }
    drop(tx);
    let _ = writer.await;
    info!("WebSocket connection terminated for connection_id: {}", conn_id);
}

#[cfg(test)]
#[path = "handler_test.rs"]
mod tests;
