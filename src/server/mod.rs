//! WebSocket transport for parlor.
//!
//! This is the delivery layer over the chat engine: one WebSocket per
//! connection, client commands in, room events out. The engine stays
//! transport-agnostic; this module drains each connection's event
//! queue into its socket.
//!
//! Identity is resolved by the external auth collaborator. The demo
//! handler reads it from query parameters at upgrade time and trusts
//! it; a production deployment fronts this with real authentication.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::chat::{ChatEngine, ChatEvent, ChatSession, SendOutcome};
use crate::db::Message;
use crate::identity::{Identity, Role};
use crate::ParlorError;

/// Query parameters for the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Authenticated username.
    pub username: String,
    /// Resolved role; defaults to `user`.
    pub role: Option<String>,
}

/// Commands sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, leaving the current one if joined.
    Join {
        /// Room name.
        room: String,
        /// Room password, when the room has one.
        password: Option<String>,
    },
    /// Send a chat message to the joined room.
    Message {
        /// Message content.
        content: String,
    },
    /// Leave the current room.
    Leave,
    /// Heartbeat ping.
    Ping,
}

/// Transport-level frames sent to the client in addition to the
/// room-scoped [`ChatEvent`]s.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Message history replayed on join, in visible order.
    History {
        /// Pinned first, then approved messages, insertion order each.
        messages: Vec<MessageInfo>,
    },
    /// A failure reported to this connection only.
    Error {
        /// Error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// Heartbeat pong response.
    Pong,
}

impl ServerFrame {
    /// Create an error frame.
    fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A message as replayed in the history frame.
#[derive(Debug, Clone, Serialize)]
pub struct MessageInfo {
    /// Message ID.
    pub id: i64,
    /// Sender's username.
    pub username: String,
    /// Post-filter content.
    pub content: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl From<&Message> for MessageInfo {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            username: message.username.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp.to_rfc3339(),
        }
    }
}

/// Stable error code for a protocol failure.
fn error_code(error: &ParlorError) -> &'static str {
    match error {
        ParlorError::RoomNotFound(_) => "room_not_found",
        ParlorError::RoomArchived(_) => "room_archived",
        ParlorError::AuthFailed => "auth_failed",
        ParlorError::Unauthorized(_) => "unauthorized",
        ParlorError::NotFound(_) => "not_found",
        ParlorError::NotInRoom => "not_in_room",
        ParlorError::RoomExists(_) => "room_exists",
        ParlorError::InvalidRule(_) => "invalid_rule",
        _ => "internal",
    }
}

/// Build the transport router over a shared engine.
pub fn router(engine: Arc<ChatEngine>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .with_state(engine)
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}

/// WebSocket upgrade handler.
///
/// GET /ws?username={username}&role={role}
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<ChatEngine>>,
    Query(query): Query<WsQuery>,
) -> Response {
    let role = match query.role.as_deref() {
        None => Role::User,
        Some(s) => match s.parse() {
            Ok(role) => role,
            Err(_) => {
                tracing::debug!("WebSocket connection rejected: unknown role {s}");
                return Response::builder()
                    .status(400)
                    .body("Unknown role".into())
                    .unwrap();
            }
        },
    };

    let identity = Identity::new(query.username, role);
    tracing::info!(
        "WebSocket connection from {} ({})",
        identity.username,
        identity.role
    );

    ws.on_upgrade(move |socket| handle_socket(socket, engine, identity))
}

/// Drive one connection: client commands in, room events out.
async fn handle_socket(socket: WebSocket, engine: Arc<ChatEngine>, identity: Identity) {
    let mut session = ChatSession::new(Arc::clone(&engine), identity);
    tracing::debug!(
        "Session {} started for {}",
        session.connection_id(),
        session.identity().username
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut events: Option<mpsc::Receiver<ChatEvent>> = None;

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handle_client_message(
                                    &mut ws_sender,
                                    &engine,
                                    &mut session,
                                    client_msg,
                                    &mut events,
                                )
                                .await;
                            }
                            Err(e) => {
                                tracing::debug!("Failed to parse client message: {e}");
                                send_frame(
                                    &mut ws_sender,
                                    &ServerFrame::error("invalid_message", "Invalid message format"),
                                )
                                .await;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {e}");
                        break;
                    }
                }
            }

            event = async {
                match events.as_mut() {
                    Some(receiver) => receiver.recv().await,
                    // No room joined; wait until the other branch wakes us
                    None => std::future::pending().await,
                }
            } => {
                match event {
                    Some(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => {
                        // Queue closed: room deleted, or we were dropped
                        // as a slow consumer
                        events = None;
                    }
                }
            }
        }
    }

    session.disconnect().await;
    tracing::debug!("Session {} ended", session.connection_id());
}

/// Handle one client command.
async fn handle_client_message(
    ws_sender: &mut SplitSink<WebSocket, WsMessage>,
    engine: &Arc<ChatEngine>,
    session: &mut ChatSession,
    msg: ClientMessage,
    events: &mut Option<mpsc::Receiver<ChatEvent>>,
) {
    match msg {
        ClientMessage::Join { room, password } => {
            match session.join(&room, password.as_deref()).await {
                Ok(receiver) => {
                    *events = Some(receiver);

                    // Replay visible history before live events
                    match engine.recent_messages(&room).await {
                        Ok(messages) => {
                            let frame = ServerFrame::History {
                                messages: messages.iter().map(MessageInfo::from).collect(),
                            };
                            send_frame(ws_sender, &frame).await;
                        }
                        Err(e) => {
                            tracing::warn!("Failed to load history for {room}: {e}");
                            send_frame(
                                ws_sender,
                                &ServerFrame::error("internal", "Failed to load history"),
                            )
                            .await;
                        }
                    }
                }
                Err(e) => {
                    send_frame(ws_sender, &ServerFrame::error(error_code(&e), e.to_string()))
                        .await;
                }
            }
        }

        ClientMessage::Message { content } => match session.send(&content).await {
            // The room echo carries the server-assigned id/timestamp
            Ok(SendOutcome::Delivered(_)) => {}
            Ok(SendOutcome::Blocked) => {
                send_frame(
                    ws_sender,
                    &ServerFrame::error("blocked", "Message blocked by keyword filter"),
                )
                .await;
            }
            Ok(SendOutcome::Muted) => {
                send_frame(ws_sender, &ServerFrame::error("muted", "You are muted")).await;
            }
            Err(e) => {
                send_frame(ws_sender, &ServerFrame::error(error_code(&e), e.to_string())).await;
            }
        },

        ClientMessage::Leave => {
            if !session.leave().await {
                send_frame(
                    ws_sender,
                    &ServerFrame::error("not_in_room", "You are not in a room"),
                )
                .await;
            }
            // The queue's leave notice drains before the closed queue
            // clears `events` in the select loop
        }

        ClientMessage::Ping => {
            send_frame(ws_sender, &ServerFrame::Pong).await;
        }
    }
}

/// Serialize and send a transport frame, ignoring send failures (the
/// main loop notices the dead socket on its next turn).
async fn send_frame(ws_sender: &mut SplitSink<WebSocket, WsMessage>, frame: &ServerFrame) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = ws_sender.send(WsMessage::Text(json.into())).await;
    }
}
