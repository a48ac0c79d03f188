pub mod cache;
pub mod factory;
pub mod sled_store;
pub mod store;

pub use cache::ProfileCache;
pub use factory::{create_in_memory_store, create_store};
pub use sled_store::SledStore;
pub use store::*;

use crate::error::Result;
use crate::models::{ChatMessage, Conversation, Participant, User};
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Trait for chat persistence operations.
///
/// Rooms and private conversations share one message namespace: a room id is
/// either a well-known room name or a conversation id rendered as a string.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a new message
    async fn save_message(&self, message: &ChatMessage) -> Result<()>;

    /// Get a message by id
    async fn get_message(&self, id: &Uuid) -> Result<Option<ChatMessage>>;

    /// Rewrite an existing message (edits and soft deletes)
    async fn update_message(&self, message: &ChatMessage) -> Result<()>;

    /// Page through a room's non-deleted messages, oldest first.
    /// Pages are 1-based.
    async fn list_room_messages(&self, room_id: &str, page: u32, limit: u32)
        -> Result<HistoryPage>;

    /// Insert or replace a mirrored user record
    async fn upsert_user(&self, user: &User) -> Result<()>;

    /// Get a user by id
    async fn get_user(&self, id: &Uuid) -> Result<Option<User>>;

    /// Find the private conversation for an unordered user pair, creating it
    /// (with both participant rows) if absent. Returns the conversation and
    /// whether this call created it. Exactly one conversation ever exists
    /// per pair, no matter how many callers race here.
    async fn get_or_create_private_conversation(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<(Conversation, bool)>;

    /// Get a conversation by id
    async fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>>;

    /// Participant rows for a conversation
    async fn conversation_participants(&self, id: &Uuid) -> Result<Vec<Participant>>;

    /// Whether the user is a member of the conversation
    async fn is_participant(&self, conversation_id: &Uuid, user_id: Uuid) -> Result<bool>;

    /// Bump a conversation's last-activity timestamp
    async fn touch_conversation(&self, id: &Uuid) -> Result<()>;
}

/// One page of room history plus the metadata clients need to page further
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    /// Messages in ascending creation order
    pub messages: Vec<ChatMessage>,
    /// Total non-deleted messages in the room
    pub total: u64,
    /// 1-based page number that was requested
    pub page: u32,
    /// Page size that was applied
    pub limit: u32,
    /// ceil(total / limit)
    pub total_pages: u32,
}

impl HistoryPage {
    /// Build a page from the full ascending message list of a room
    pub fn slice(mut messages: Vec<ChatMessage>, page: u32, limit: u32) -> Self {
        let total = messages.len() as u64;
        let limit = limit.max(1);
        let page = page.max(1);
        let total_pages = ((total + limit as u64 - 1) / limit as u64) as u32;

        let start = ((page - 1) as usize).saturating_mul(limit as usize);
        let messages = if start >= messages.len() {
            Vec::new()
        } else {
            messages.drain(start..).take(limit as usize).collect()
        };

        Self {
            messages,
            total,
            page,
            limit,
            total_pages,
        }
    }

    pub fn empty(page: u32, limit: u32) -> Self {
        Self::slice(Vec::new(), page, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| ChatMessage::new("room".to_string(), Uuid::new_v4(), format!("msg {}", i)))
            .collect()
    }

    #[test]
    fn test_slice_pages_cover_everything() {
        let all = messages(10);
        let p1 = HistoryPage::slice(all.clone(), 1, 4);
        let p2 = HistoryPage::slice(all.clone(), 2, 4);
        let p3 = HistoryPage::slice(all.clone(), 3, 4);

        assert_eq!(p1.total, 10);
        assert_eq!(p1.total_pages, 3);
        assert_eq!(p1.messages.len(), 4);
        assert_eq!(p2.messages.len(), 4);
        assert_eq!(p3.messages.len(), 2);

        let mut rebuilt = p1.messages;
        rebuilt.extend(p2.messages);
        rebuilt.extend(p3.messages);
        assert_eq!(rebuilt, all);
    }

    #[test]
    fn test_slice_past_the_end_is_empty() {
        let page = HistoryPage::slice(messages(3), 5, 10);
        assert!(page.messages.is_empty());
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.page, 5);
    }

    #[test]
    fn test_slice_empty_room() {
        let page = HistoryPage::empty(1, 50);
        assert!(page.messages.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn test_slice_clamps_degenerate_inputs() {
        // page 0 and limit 0 are treated as 1 rather than panicking
        let page = HistoryPage::slice(messages(2), 0, 0);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 1);
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.total_pages, 2);
    }
}
