//! WebSocket endpoints and per-socket lifecycle.
//!
//! Two upgrade handlers share one socket loop. The community endpoint
//! accepts everyone and downgrades bad credentials to a guest session;
//! the private endpoint refuses the upgrade outright unless the token
//! verifies. After the upgrade both surfaces run [`handle_socket`]:
//! register the connection, announce presence, then pump frames until
//! the peer goes away.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::stream::StreamExt;
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::auth::{extract_token, Identity};
use crate::metrics;

use super::{
    connection::{Connection, MessageWriter},
    handler::handle_frame,
    messages::{ClientFrame, ServerMessage},
    session::{Session, Surface},
    ChatState,
};

/// Community chat endpoint. Tokens are optional here; anything that
/// fails verification becomes a guest session rather than an error.
pub async fn community_chat_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<ChatState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let token = extract_token(&headers, &params);
    let declared = match params.get("user_id") {
        Some(raw) => match raw.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(remote_addr = %addr, "Unparseable user_id in community handshake");
                None
            }
        },
        None => None,
    };
    let identity = state
        .authenticator
        .authenticate_community(token.as_deref(), declared);
    info!(remote_addr = %addr, identity = identity.label(), "Community chat connection request");

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, Surface::Community, identity))
}

/// Private chat endpoint. The token must verify before the upgrade is
/// granted; failures answer with 401 and never reach the socket loop.
pub async fn private_chat_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<ChatState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let token = extract_token(&headers, &params);
    let user = match state.authenticator.authenticate_private(token.as_deref()) {
        Ok(user) => user,
        Err(e) => {
            warn!(remote_addr = %addr, error = %e, "Private chat connection refused");
            return e.into_response();
        }
    };

    info!(remote_addr = %addr, user_id = %user.user_id, "Private chat connection request");
    let identity = Identity::Verified {
        user_id: user.user_id,
        handle: user.handle,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, Surface::Private, identity))
}

/// Drive one WebSocket connection from upgrade to teardown.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<ChatState>,
    addr: SocketAddr,
    surface: Surface,
    identity: Identity,
) {
    let (sender, mut receiver) = socket.split();
    let mut writer = MessageWriter::new(sender);

    let session = Session::new(surface, identity);
    let connection_id = session.id.clone();

    info!(
        connection_id = %connection_id,
        remote_addr = %addr,
        surface = surface.label(),
        "Chat session started"
    );

    let (connection, mut message_rx) = state
        .connections
        .register(session, Some(addr.to_string()));
    metrics::record_connection();

    // Known identity straight from the handshake counts toward presence.
    if let Some(user_id) = connection.user_id() {
        if state.presence.connect(user_id, &connection_id) {
            state.broadcast_status_change(user_id, true);
        }
        state.sync_online_gauge();
    }

    let welcome = ServerMessage::Welcome {
        connection_id: connection_id.clone(),
        authenticated: connection.user_id().is_some(),
        server_time: Utc::now(),
        default_room: state.config.default_room.clone(),
    };
    if let Err(e) = writer.send(welcome).await {
        warn!(connection_id = %connection_id, error = ?e, "Failed to send welcome message");
        disconnect_cleanup(&state, &connection).await;
        return;
    }

    // Writer task: drain the outbound queue into the socket.
    let writer_connection_id = connection_id.clone();
    let sender_handle = tokio::spawn(async move {
        while let Some(message) = message_rx.recv().await {
            if let Err(e) = writer.send(message).await {
                debug!(connection_id = %writer_connection_id, error = ?e, "Outbound write failed");
                break;
            }
        }
        let _ = writer.close().await;
    });

    // Heartbeat task: periodic pong keeps idle proxies from dropping us.
    let heartbeat_connection = connection.clone();
    let heartbeat_interval = state.config.heartbeat_interval_secs;
    let heartbeat_handle = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(heartbeat_interval));
        loop {
            ticker.tick().await;
            let pong = ServerMessage::Pong {
                timestamp: Utc::now(),
            };
            if heartbeat_connection.send(pong).is_err() {
                debug!("Heartbeat failed, connection closed");
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(connection_id = %connection_id, error = ?e, "WebSocket error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => handle_frame(&state, &connection, frame).await,
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "Undecodable frame");
                    let error_msg = ServerMessage::Error {
                        code: "INVALID_MESSAGE".to_string(),
                        message: format!("Failed to parse message: {}", e),
                    };
                    let _ = connection.send(error_msg);
                }
            },
            Message::Binary(_) => {
                warn!(connection_id = %connection_id, "Received binary message (not supported)");
                let error_msg = ServerMessage::Error {
                    code: "UNSUPPORTED".to_string(),
                    message: "Binary messages are not supported".to_string(),
                };
                let _ = connection.send(error_msg);
            }
            Message::Ping(_) => {
                // Axum answers the pong itself.
                debug!(connection_id = %connection_id, "Received ping");
            }
            Message::Pong(_) => {
                connection.session.write().touch();
            }
            Message::Close(_) => {
                info!(connection_id = %connection_id, "Client closed connection");
                break;
            }
        }
    }

    sender_handle.abort();
    heartbeat_handle.abort();
    disconnect_cleanup(&state, &connection).await;
}

/// Tear down everything a connection touched: room memberships with
/// their departure broadcasts, presence, the registry entry, metrics.
/// Safe to call twice for the same connection; the second call finds
/// the registry entry gone and stops.
pub async fn disconnect_cleanup(state: &Arc<ChatState>, connection: &Arc<Connection>) {
    let (connection_id, identity, age) = {
        let session = connection.session.read();
        (
            session.id.clone(),
            session.identity.clone(),
            session.age_seconds(),
        )
    };

    if !state.connections.unregister(&connection_id) {
        return;
    }

    let rooms_left = state.rooms.leave_all(&connection_id);
    if !rooms_left.is_empty() {
        let user = match identity.user_id() {
            Some(id) => Some(state.author_profile(id).await),
            None => None,
        };
        for room_id in rooms_left {
            state.rooms.broadcast(
                &state.connections,
                &room_id,
                ServerMessage::UserLeft {
                    room_id: room_id.clone(),
                    user: user.clone(),
                },
            );
        }
    }

    if let Some(user_id) = identity.user_id() {
        if state.presence.disconnect(user_id, &connection_id) {
            state.broadcast_status_change(user_id, false);
        }
        state.sync_online_gauge();
    }

    metrics::record_disconnection(age as f64);
    info!(connection_id = %connection_id, "Chat session ended");
}

/// Periodic sweep for sessions that stopped talking. Reaping runs the
/// same teardown as a normal disconnect, so a session that expires and
/// then closes its socket is cleaned up exactly once.
pub async fn cleanup_task(state: Arc<ChatState>) {
    let mut ticker = interval(Duration::from_secs(state.config.cleanup_interval_secs));

    loop {
        ticker.tick().await;

        let expired = state
            .connections
            .expired_connection_ids(state.config.session_timeout_secs as i64);
        if expired.is_empty() {
            continue;
        }

        debug!(count = expired.len(), "Reaping expired chat sessions");
        for connection_id in expired {
            if let Some(connection) = state.connections.get(&connection_id) {
                info!(connection_id = %connection_id, "Session expired");
                disconnect_cleanup(&state, &connection).await;
            }
        }
    }
}
