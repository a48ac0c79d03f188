//! Chat event dispatch.
//!
//! Every inbound frame lands in [`handle_frame`], which routes to a
//! per-event handler. Handlers follow a common shape: validate, apply
//! the change through the store, then broadcast the resulting event to
//! the affected room. Acknowledgements go back to the sender only, so
//! a client that supplied an `ack_id` always gets exactly one answer
//! per frame (typing and ping are the fire-and-forget exceptions).

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{ChatMessage, Conversation};

use super::connection::Connection;
use super::messages::{AckData, ClientFrame, ClientMessage, MessageView, PageInfo, ServerMessage};
use super::session::Surface;
use super::ChatState;

/// Dispatch a single decoded client frame.
pub async fn handle_frame(state: &Arc<ChatState>, connection: &Arc<Connection>, frame: ClientFrame) {
    metrics::record_message_received();
    {
        connection.session.write().touch();
    }

    let ClientFrame { ack_id, message } = frame;

    match message {
        ClientMessage::Ping { timestamp } => {
            let reply = ServerMessage::Pong {
                timestamp: timestamp.unwrap_or_else(Utc::now),
            };
            deliver(connection, reply);
        }
        ClientMessage::Typing { room_id, is_typing } => {
            handle_typing(state, connection, &room_id, is_typing).await;
        }
        ClientMessage::JoinRoom { room_id } => {
            let result = handle_join(state, connection, &room_id).await;
            respond(connection, ack_id, "join room", result.map(|_| None));
        }
        ClientMessage::SendMessage { room_id, body } => {
            let result = handle_send(state, connection, &room_id, &body).await;
            respond(
                connection,
                ack_id,
                "send message",
                result.map(|view| Some(AckData::Message(view))),
            );
        }
        ClientMessage::EditMessage { message_id, body } => {
            let result = handle_edit(state, connection, message_id, &body).await;
            respond(
                connection,
                ack_id,
                "edit message",
                result.map(|view| Some(AckData::Message(view))),
            );
        }
        ClientMessage::DeleteMessage { message_id } => {
            let result = handle_delete(state, connection, message_id).await;
            respond(connection, ack_id, "delete message", result.map(|_| None));
        }
        ClientMessage::LoadMessages { room_id, page, limit } => {
            let room = room_id.unwrap_or_else(|| state.config.default_room.clone());
            let page = page.max(1);
            let limit = normalize_limit(state, limit);
            match handle_load(state, connection, &room, page, limit).await {
                Ok((views, info)) => {
                    deliver(
                        connection,
                        ServerMessage::ack_ok(ack_id, Some(AckData::Messages(views)), Some(info)),
                    );
                }
                Err(e) => {
                    log_failure("load messages", &e);
                    // History reads degrade to an empty page rather than a bare
                    // error, so list views can render without special-casing.
                    deliver(
                        connection,
                        ServerMessage::Ack {
                            ack_id,
                            success: false,
                            data: Some(AckData::Messages(Vec::new())),
                            pagination: Some(PageInfo::empty(page, limit)),
                            error: Some(e.ack_message("load messages")),
                        },
                    );
                }
            }
        }
        ClientMessage::AuthenticateUser { user_id } => {
            let result = handle_authenticate(state, connection, user_id).await;
            respond(
                connection,
                ack_id,
                "authenticate",
                result.map(|profile| Some(AckData::Profile(profile))),
            );
        }
        ClientMessage::SendPrivateMessage { conversation_id, body } => {
            let result = handle_send_private(state, connection, conversation_id, &body).await;
            respond(
                connection,
                ack_id,
                "send private message",
                result.map(|view| Some(AckData::Message(view))),
            );
        }
    }
}

/// Send an ack for `result`, masking non-client-safe errors.
fn respond(
    connection: &Arc<Connection>,
    ack_id: Option<String>,
    operation: &str,
    result: Result<Option<AckData>>,
) {
    let ack = match result {
        Ok(data) => ServerMessage::ack_ok(ack_id, data, None),
        Err(e) => {
            log_failure(operation, &e);
            ServerMessage::ack_err(ack_id, e.ack_message(operation))
        }
    };
    deliver(connection, ack);
}

fn log_failure(operation: &str, error: &AppError) {
    if error.is_client_safe() {
        debug!(operation, error = %error, "Rejected chat event");
    } else {
        error!(operation, error = %error, "Chat event failed");
    }
}

fn deliver(connection: &Arc<Connection>, message: ServerMessage) {
    if connection.send(message).is_ok() {
        metrics::record_message_sent();
    } else {
        metrics::record_send_error();
    }
}

fn snapshot(connection: &Connection) -> (String, Identity) {
    let session = connection.session.read();
    (session.id.clone(), session.identity.clone())
}

fn require_user(identity: &Identity) -> Result<Uuid> {
    identity
        .user_id()
        .ok_or_else(|| AppError::Authentication("Not authenticated".to_string()))
}

fn validate_body(state: &ChatState, body: &str) -> Result<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Message body cannot be empty".to_string()));
    }
    if trimmed.chars().count() > state.config.max_message_len {
        return Err(AppError::Validation(format!(
            "Message body exceeds {} characters",
            state.config.max_message_len
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_room(room_id: &str) -> Result<&str> {
    let trimmed = room_id.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Room id cannot be empty".to_string()));
    }
    Ok(trimmed)
}

fn normalize_limit(state: &ChatState, limit: u32) -> u32 {
    if limit == 0 {
        state.config.default_page_size
    } else {
        limit.min(state.config.max_page_size)
    }
}

/// Resolve a room id to a stored conversation, if it names one.
///
/// Community room ids are free-form strings; conversation rooms are the
/// conversation uuid rendered as a string. A uuid-shaped id with no
/// stored conversation behind it is treated as an ordinary room.
async fn conversation_for_room(state: &ChatState, room_id: &str) -> Result<Option<Conversation>> {
    match Uuid::parse_str(room_id) {
        Ok(id) => state.store.get_conversation(&id).await,
        Err(_) => Ok(None),
    }
}

async fn ensure_participant(
    state: &ChatState,
    conversation_id: &Uuid,
    user_id: Option<Uuid>,
) -> Result<()> {
    let user_id =
        user_id.ok_or_else(|| AppError::Authentication("Not authenticated".to_string()))?;
    if state.store.is_participant(conversation_id, user_id).await? {
        Ok(())
    } else {
        Err(AppError::Authorization(
            "Not a participant of this conversation".to_string(),
        ))
    }
}

async fn handle_join(state: &Arc<ChatState>, connection: &Arc<Connection>, room_id: &str) -> Result<()> {
    let room_id = validate_room(room_id)?;
    let (connection_id, identity) = snapshot(connection);

    if let Some(conversation) = conversation_for_room(state, room_id).await? {
        ensure_participant(state, &conversation.id, identity.user_id()).await?;
    }

    let newly_joined = state.rooms.join(room_id, &connection_id);
    {
        connection.session.write().join_room(room_id);
    }

    if newly_joined {
        let user = match identity.user_id() {
            Some(id) => Some(state.author_profile(id).await),
            None => None,
        };
        state.rooms.broadcast_except(
            &state.connections,
            room_id,
            Some(&connection_id),
            ServerMessage::UserJoined {
                room_id: room_id.to_string(),
                user,
            },
        );
        info!(room_id, connection_id = %connection_id, "Connection joined room");
    }
    Ok(())
}

async fn handle_send(
    state: &Arc<ChatState>,
    connection: &Arc<Connection>,
    room_id: &str,
    body: &str,
) -> Result<MessageView> {
    let room_id = validate_room(room_id)?;
    let body = validate_body(state, body)?;
    let (_, identity) = snapshot(connection);
    let user_id = require_user(&identity)?;

    if conversation_for_room(state, room_id).await?.is_some() {
        return Err(AppError::Validation(
            "Use send_private_message for private conversations".to_string(),
        ));
    }

    let message = ChatMessage::new(room_id.to_string(), user_id, body);
    state.store.save_message(&message).await?;

    let author = state.author_profile(user_id).await;
    let view = MessageView::hydrate(message, author);
    state.rooms.broadcast(
        &state.connections,
        room_id,
        ServerMessage::MessageReceived {
            message: view.clone(),
        },
    );
    debug!(room_id, message_id = %view.id, "Message stored and broadcast");
    Ok(view)
}

async fn handle_edit(
    state: &Arc<ChatState>,
    connection: &Arc<Connection>,
    message_id: Uuid,
    body: &str,
) -> Result<MessageView> {
    let body = validate_body(state, body)?;
    let (_, identity) = snapshot(connection);
    let user_id = require_user(&identity)?;

    let mut message = state
        .store
        .get_message(&message_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message_id)))?;

    if message.author_id != user_id {
        return Err(AppError::Authorization(
            "You can only edit your own messages".to_string(),
        ));
    }
    if message.deleted {
        return Err(AppError::Validation("Cannot edit a deleted message".to_string()));
    }

    message.edit(body);
    state.store.update_message(&message).await?;

    let author = state.author_profile(user_id).await;
    let view = MessageView::hydrate(message, author);
    state.rooms.broadcast(
        &state.connections,
        &view.room_id,
        ServerMessage::MessageEdited {
            message: view.clone(),
        },
    );
    Ok(view)
}

async fn handle_delete(
    state: &Arc<ChatState>,
    connection: &Arc<Connection>,
    message_id: Uuid,
) -> Result<()> {
    let (_, identity) = snapshot(connection);
    let user_id = require_user(&identity)?;

    let mut message = state
        .store
        .get_message(&message_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message_id)))?;

    if message.author_id != user_id {
        return Err(AppError::Authorization(
            "You can only delete your own messages".to_string(),
        ));
    }
    if message.deleted {
        // Repeat deletes succeed without another broadcast.
        return Ok(());
    }

    message.soft_delete();
    state.store.update_message(&message).await?;

    state.rooms.broadcast(
        &state.connections,
        &message.room_id,
        ServerMessage::MessageDeleted {
            room_id: message.room_id.clone(),
            message_id: message.id,
            deleted: true,
        },
    );
    info!(message_id = %message_id, "Message soft-deleted");
    Ok(())
}

async fn handle_typing(
    state: &Arc<ChatState>,
    connection: &Arc<Connection>,
    room_id: &str,
    is_typing: bool,
) {
    let room_id = room_id.trim();
    if room_id.is_empty() {
        return;
    }
    let (connection_id, identity) = snapshot(connection);
    let user = match identity.user_id() {
        Some(id) => Some(state.author_profile(id).await),
        None => None,
    };
    state.rooms.broadcast_except(
        &state.connections,
        room_id,
        Some(&connection_id),
        ServerMessage::UserTyping {
            room_id: room_id.to_string(),
            user,
            is_typing,
        },
    );
}

async fn handle_load(
    state: &Arc<ChatState>,
    connection: &Arc<Connection>,
    room_id: &str,
    page: u32,
    limit: u32,
) -> Result<(Vec<MessageView>, PageInfo)> {
    let room_id = validate_room(room_id)?;
    let (_, identity) = snapshot(connection);

    if let Some(conversation) = conversation_for_room(state, room_id).await? {
        ensure_participant(state, &conversation.id, identity.user_id()).await?;
    }

    let history = state.store.list_room_messages(room_id, page, limit).await?;
    let info = PageInfo::from(&history);
    let mut views = Vec::with_capacity(history.messages.len());
    for message in history.messages {
        let author = state.author_profile(message.author_id).await;
        views.push(MessageView::hydrate(message, author));
    }
    Ok((views, info))
}

async fn handle_authenticate(
    state: &Arc<ChatState>,
    connection: &Arc<Connection>,
    user_id: Uuid,
) -> Result<crate::models::PublicProfile> {
    if user_id.is_nil() {
        return Err(AppError::Validation("User id is required".to_string()));
    }

    let (connection_id, surface, identity) = {
        let session = connection.session.read();
        (session.id.clone(), session.surface, session.identity.clone())
    };

    if surface == Surface::Private {
        return Err(AppError::Validation(
            "Connection is already authenticated".to_string(),
        ));
    }

    if let Identity::Verified { user_id: verified, .. } = &identity {
        if *verified == user_id {
            return Ok(state.author_profile(user_id).await);
        }
        return Err(AppError::Authorization(
            "Cannot re-identify a verified connection".to_string(),
        ));
    }

    let previous = identity.user_id();
    {
        connection.session.write().identity = Identity::Declared { user_id };
    }

    if previous != Some(user_id) {
        if let Some(old) = previous {
            if state.presence.disconnect(old, &connection_id) {
                state.broadcast_status_change(old, false);
            }
        }
        if state.presence.connect(user_id, &connection_id) {
            state.broadcast_status_change(user_id, true);
        }
        state.sync_online_gauge();
        info!(connection_id = %connection_id, user_id = %user_id, "Connection identified");
    }

    Ok(state.author_profile(user_id).await)
}

async fn handle_send_private(
    state: &Arc<ChatState>,
    connection: &Arc<Connection>,
    conversation_id: Uuid,
    body: &str,
) -> Result<MessageView> {
    let body = validate_body(state, body)?;
    let (_, identity) = snapshot(connection);

    let user_id = match &identity {
        Identity::Verified { user_id, .. } => *user_id,
        Identity::Declared { .. } | Identity::Guest => {
            return Err(AppError::Authentication(
                "Private messaging requires a verified session".to_string(),
            ));
        }
    };

    let conversation = state
        .store
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", conversation_id)))?;
    ensure_participant(state, &conversation.id, Some(user_id)).await?;

    let room_id = conversation.id.to_string();
    let message = ChatMessage::new(room_id.clone(), user_id, body);
    state.store.save_message(&message).await?;
    if let Err(e) = state.store.touch_conversation(&conversation.id).await {
        warn!(conversation_id = %conversation.id, error = %e, "Failed to bump conversation activity");
    }

    let author = state.author_profile(user_id).await;
    let view = MessageView::hydrate(message, author);
    state.rooms.broadcast(
        &state.connections,
        &room_id,
        ServerMessage::PrivateMessageReceived {
            conversation_id: conversation.id,
            message: view.clone(),
        },
    );
    debug!(conversation_id = %conversation.id, message_id = %view.id, "Private message delivered");
    Ok(view)
}
