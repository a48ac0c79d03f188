use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Kind of conversation a room id can resolve to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConversationKind {
    /// Exactly two participants, found or created on demand
    Private,
    /// Open community room, joinable by anyone
    Community,
}

/// A conversation container. Community rooms are implicit (any string room
/// id works); private conversations get a record so membership can be
/// enforced before delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub created_at: DateTime<Utc>,
    /// Bumped whenever a message lands in the conversation
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new private conversation
    pub fn private() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: ConversationKind::Private,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Record activity
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

/// Membership row linking a user to a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(conversation_id: Uuid, user_id: Uuid) -> Self {
        Self {
            conversation_id,
            user_id,
            joined_at: Utc::now(),
        }
    }
}

/// Canonical key for a two-party conversation: the pair sorted ascending, so
/// (a, b) and (b, a) resolve to the same conversation.
pub fn participant_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
