use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body shown in place of a deleted message. The original text is removed
/// from the record, not just hidden.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// A chat message in a room or private conversation.
///
/// Messages are soft-deleted: the record survives so history pagination and
/// ordering stay stable, but the body is replaced with a placeholder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Unique, time-ordered identifier
    pub id: Uuid,

    /// Room this message belongs to (well-known room name or conversation id)
    pub room_id: String,

    /// Author's user id
    pub author_id: Uuid,

    /// Message text
    pub body: String,

    /// When the message was created
    pub created_at: DateTime<Utc>,

    /// Set on the first successful edit, bumped on later ones
    pub edited_at: Option<DateTime<Utc>>,

    /// Whether the message has been soft-deleted
    #[serde(default)]
    pub deleted: bool,
}

impl ChatMessage {
    /// Create a new message. Ids are UUIDv7 so lexicographic order matches
    /// creation order in range scans.
    pub fn new(room_id: String, author_id: Uuid, body: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            room_id,
            author_id,
            body,
            created_at: Utc::now(),
            edited_at: None,
            deleted: false,
        }
    }

    /// Replace the body and stamp the edit time
    pub fn edit(&mut self, new_body: String) {
        self.body = new_body;
        self.edited_at = Some(Utc::now());
    }

    /// Soft-delete: flag the record and overwrite the body with the
    /// placeholder so the original text is unrecoverable from this store.
    pub fn soft_delete(&mut self) {
        self.deleted = true;
        self.body = DELETED_PLACEHOLDER.to_string();
    }
}
