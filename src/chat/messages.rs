//! Chat wire protocol
//!
//! Message types exchanged with chat clients over the websocket. Frames are
//! JSON with a `type` tag. Every mutating client event is answered by exactly
//! one `ack` frame, matched to the request by an optional client-chosen
//! `ack_id`; broadcasts go out as their own frame types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, PublicProfile};
use crate::state::HistoryPage;

/// A frame received from a client: an optional ack correlation id plus the
/// tagged event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Echoed back in the ack so the client can match request to response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<String>,

    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Event sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe this connection to a room or conversation
    JoinRoom { room_id: String },
    /// Post a message to a community room
    SendMessage { room_id: String, body: String },
    /// Replace the body of an own message
    EditMessage { message_id: Uuid, body: String },
    /// Soft-delete an own message
    DeleteMessage { message_id: Uuid },
    /// Ephemeral typing indicator; never acked, never persisted
    Typing {
        room_id: String,
        #[serde(default = "default_is_typing")]
        is_typing: bool,
    },
    /// Page through room history
    LoadMessages {
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default = "default_page")]
        page: u32,
        /// 0 means "use the server default"
        #[serde(default)]
        limit: u32,
    },
    /// Legacy identity declaration for the community surface
    AuthenticateUser { user_id: Uuid },
    /// Post a message into a private conversation
    SendPrivateMessage { conversation_id: Uuid, body: String },
    /// Keep-alive; answered with a pong
    Ping {
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

fn default_is_typing() -> bool {
    true
}

fn default_page() -> u32 {
    1
}

/// Frame sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame after the upgrade completes
    Welcome {
        connection_id: String,
        /// Whether the handshake yielded a known user (verified or declared)
        authenticated: bool,
        server_time: DateTime<Utc>,
        /// Community room the client is expected to join first
        default_room: String,
    },
    /// Reply to a mutating or read event
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<AckData>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pagination: Option<PageInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Someone subscribed to a room this connection is in
    UserJoined {
        room_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<PublicProfile>,
    },
    /// Someone left a room this connection is in
    UserLeft {
        room_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<PublicProfile>,
    },
    /// New message in a community room
    MessageReceived { message: MessageView },
    /// A message's body changed
    MessageEdited { message: MessageView },
    /// A message was soft-deleted; clients blank it locally by id
    MessageDeleted {
        room_id: String,
        message_id: Uuid,
        deleted: bool,
    },
    /// Ephemeral typing indicator
    UserTyping {
        room_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<PublicProfile>,
        is_typing: bool,
    },
    /// Presence transition, delivered on the private surface only
    UserStatusChanged { user_id: Uuid, is_online: bool },
    /// New message in a private conversation
    PrivateMessageReceived {
        conversation_id: Uuid,
        message: MessageView,
    },
    /// Keep-alive reply
    Pong { timestamp: DateTime<Utc> },
    /// Frame-level failure (unparseable input, unsupported frame kind)
    Error { code: String, message: String },
}

impl ServerMessage {
    /// Successful ack
    pub fn ack_ok(
        ack_id: Option<String>,
        data: Option<AckData>,
        pagination: Option<PageInfo>,
    ) -> Self {
        ServerMessage::Ack {
            ack_id,
            success: true,
            data,
            pagination,
            error: None,
        }
    }

    /// Failure ack
    pub fn ack_err(ack_id: Option<String>, error: String) -> Self {
        ServerMessage::Ack {
            ack_id,
            success: false,
            data: None,
            pagination: None,
            error: Some(error),
        }
    }
}

/// Payload carried by a successful ack
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AckData {
    /// The hydrated message (send, edit)
    Message(MessageView),
    /// One page of history (load_messages)
    Messages(Vec<MessageView>),
    /// The resolved identity (authenticate_user)
    Profile(PublicProfile),
}

/// Pagination metadata attached to history acks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PageInfo {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl From<&HistoryPage> for PageInfo {
    fn from(page: &HistoryPage) -> Self {
        Self {
            total: page.total,
            page: page.page,
            limit: page.limit,
            total_pages: page.total_pages,
        }
    }
}

impl PageInfo {
    /// Zeroed metadata for failure acks that still carry an empty list
    pub fn empty(page: u32, limit: u32) -> Self {
        Self {
            total: 0,
            page,
            limit,
            total_pages: 0,
        }
    }
}

/// A stored message joined with its author's public profile, the only
/// message shape that ever reaches clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
    pub id: Uuid,
    pub room_id: String,
    pub body: String,
    pub author: PublicProfile,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl MessageView {
    pub fn hydrate(message: ChatMessage, author: PublicProfile) -> Self {
        Self {
            id: message.id,
            room_id: message.room_id,
            body: message.body,
            author,
            created_at: message.created_at,
            edited_at: message.edited_at,
            deleted: message.deleted,
        }
    }
}
