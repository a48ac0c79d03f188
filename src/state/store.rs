use crate::error::{AppError, Result};
use crate::models::{participant_pair, ChatMessage, Conversation, Participant, User};
use crate::state::{ChatStore, HistoryPage};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory chat store (for development and testing)
#[derive(Clone)]
pub struct InMemoryStore {
    messages: Arc<DashMap<Uuid, ChatMessage>>,
    /// Room id -> message ids in insertion order
    room_index: Arc<DashMap<String, Vec<Uuid>>>,
    users: Arc<DashMap<Uuid, User>>,
    conversations: Arc<DashMap<Uuid, Conversation>>,
    participants: Arc<DashMap<Uuid, Vec<Participant>>>,
    /// Sorted user pair -> conversation id; the uniqueness guard for
    /// get-or-create
    pair_index: Arc<DashMap<(Uuid, Uuid), Uuid>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(DashMap::new()),
            room_index: Arc::new(DashMap::new()),
            users: Arc::new(DashMap::new()),
            conversations: Arc::new(DashMap::new()),
            participants: Arc::new(DashMap::new()),
            pair_index: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<()> {
        self.messages.insert(message.id, message.clone());
        self.room_index
            .entry(message.room_id.clone())
            .or_insert_with(Vec::new)
            .push(message.id);

        tracing::debug!(message_id = %message.id, room_id = %message.room_id, "Message saved");
        Ok(())
    }

    async fn get_message(&self, id: &Uuid) -> Result<Option<ChatMessage>> {
        Ok(self.messages.get(id).map(|entry| entry.clone()))
    }

    async fn update_message(&self, message: &ChatMessage) -> Result<()> {
        if self.messages.contains_key(&message.id) {
            self.messages.insert(message.id, message.clone());
            tracing::debug!(message_id = %message.id, "Message updated");
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Message {} not found",
                message.id
            )))
        }
    }

    async fn list_room_messages(
        &self,
        room_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<HistoryPage> {
        let ids = match self.room_index.get(room_id) {
            Some(entry) => entry.clone(),
            None => return Ok(HistoryPage::empty(page, limit)),
        };

        let mut messages: Vec<ChatMessage> = ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|entry| entry.clone()))
            .filter(|m| !m.deleted)
            .collect();

        // Ids are time-ordered, so this matches creation order.
        messages.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(HistoryPage::slice(messages, page, limit))
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        Ok(self.users.get(id).map(|entry| entry.clone()))
    }

    async fn get_or_create_private_conversation(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<(Conversation, bool)> {
        if a == b {
            return Err(AppError::Validation(
                "Cannot open a private conversation with yourself".to_string(),
            ));
        }

        let key = participant_pair(a, b);

        // The entry guard serializes concurrent first-contacts on the same
        // pair, so exactly one conversation can ever be created for it.
        match self.pair_index.entry(key) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                drop(existing);
                let conversation = self
                    .conversations
                    .get(&id)
                    .map(|entry| entry.clone())
                    .ok_or_else(|| {
                        AppError::Database(format!("Conversation {} missing for indexed pair", id))
                    })?;
                Ok((conversation, false))
            }
            Entry::Vacant(slot) => {
                let conversation = Conversation::private();
                self.conversations
                    .insert(conversation.id, conversation.clone());
                self.participants.insert(
                    conversation.id,
                    vec![
                        Participant::new(conversation.id, key.0),
                        Participant::new(conversation.id, key.1),
                    ],
                );
                slot.insert(conversation.id);

                tracing::debug!(
                    conversation_id = %conversation.id,
                    "Private conversation created"
                );
                Ok((conversation, true))
            }
        }
    }

    async fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(id).map(|entry| entry.clone()))
    }

    async fn conversation_participants(&self, id: &Uuid) -> Result<Vec<Participant>> {
        Ok(self
            .participants
            .get(id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn is_participant(&self, conversation_id: &Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self
            .participants
            .get(conversation_id)
            .map(|entry| entry.iter().any(|p| p.user_id == user_id))
            .unwrap_or(false))
    }

    async fn touch_conversation(&self, id: &Uuid) -> Result<()> {
        match self.conversations.get_mut(id) {
            Some(mut entry) => {
                entry.touch();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Conversation {} not found", id))),
        }
    }
}
