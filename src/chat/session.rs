//! Chat session state
//!
//! Per-connection state: which surface the connection arrived on, who is
//! behind it, and which rooms it has joined.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::auth::Identity;

/// Which websocket endpoint the connection came in through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Open community chat; guests admitted
    Community,
    /// Token-gated private messaging; receives presence broadcasts
    Private,
}

impl Surface {
    pub fn label(&self) -> &'static str {
        match self {
            Surface::Community => "community",
            Surface::Private => "private",
        }
    }
}

/// Chat session
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique connection identifier
    pub id: String,
    /// Endpoint the connection arrived on
    pub surface: Surface,
    /// Who the server believes is behind the connection
    pub identity: Identity,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp
    pub last_active: DateTime<Utc>,
    /// Rooms this connection is subscribed to
    pub rooms: HashSet<String>,
    /// Frames processed for this session
    pub message_count: u64,
}

impl Session {
    pub fn new(surface: Surface, identity: Identity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            surface,
            identity,
            created_at: now,
            last_active: now,
            rooms: HashSet::new(),
            message_count: 0,
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
        self.message_count += 1;
    }

    /// Check if the session has been idle too long
    pub fn is_expired(&self, timeout_secs: i64) -> bool {
        let now = Utc::now();
        (now - self.last_active).num_seconds() > timeout_secs
    }

    /// The user behind the connection, if it has one
    pub fn user_id(&self) -> Option<Uuid> {
        self.identity.user_id()
    }

    /// Record a room subscription. Returns false if already joined.
    pub fn join_room(&mut self, room_id: &str) -> bool {
        self.rooms.insert(room_id.to_string())
    }

    /// Drop a room subscription
    pub fn leave_room(&mut self, room_id: &str) -> bool {
        self.rooms.remove(room_id)
    }

    pub fn is_joined(&self, room_id: &str) -> bool {
        self.rooms.contains(room_id)
    }

    /// Session age in seconds
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }

    /// Idle time in seconds
    pub fn idle_seconds(&self) -> i64 {
        (Utc::now() - self.last_active).num_seconds()
    }
}
