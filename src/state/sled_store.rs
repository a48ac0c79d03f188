use crate::error::{AppError, Result};
use crate::models::{participant_pair, ChatMessage, Conversation, Participant, User};
use crate::state::{ChatStore, HistoryPage};
use async_trait::async_trait;
use sled::Db;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Persistent chat store using the Sled embedded database.
///
/// Message ids are UUIDv7, so the raw id bytes sort by creation time and a
/// prefix scan over the room index yields history already in order.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    messages_tree: sled::Tree,
    room_index_tree: sled::Tree,
    users_tree: sled::Tree,
    conversations_tree: sled::Tree,
    participants_tree: sled::Tree,
    pairs_tree: sled::Tree,
}

impl SledStore {
    /// Open (or create) a Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)
            .map_err(|e| AppError::Database(format!("Failed to open Sled database: {}", e)))?;

        let messages_tree = db.open_tree("messages")?;
        let room_index_tree = db.open_tree("room_index")?;
        let users_tree = db.open_tree("users")?;
        let conversations_tree = db.open_tree("conversations")?;
        let participants_tree = db.open_tree("participants")?;
        let pairs_tree = db.open_tree("conversation_pairs")?;

        tracing::info!("Initialized Sled store at {:?}", path_ref);

        Ok(Self {
            db: Arc::new(db),
            messages_tree,
            room_index_tree,
            users_tree,
            conversations_tree,
            participants_tree,
            pairs_tree,
        })
    }

    fn id_key(id: &Uuid) -> Vec<u8> {
        id.as_bytes().to_vec()
    }

    /// Room index key: room bytes, NUL separator, message id bytes. Room ids
    /// never contain NUL, so prefixes cannot collide across rooms.
    fn room_key(room_id: &str, message_id: &Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(room_id.len() + 17);
        key.extend_from_slice(room_id.as_bytes());
        key.push(0);
        key.extend_from_slice(message_id.as_bytes());
        key
    }

    fn room_prefix(room_id: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(room_id.len() + 1);
        prefix.extend_from_slice(room_id.as_bytes());
        prefix.push(0);
        prefix
    }

    /// Unordered-pair key: both ids sorted ascending, concatenated
    fn pair_key(a: &Uuid, b: &Uuid) -> Vec<u8> {
        let (lo, hi) = participant_pair(*a, *b);
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(lo.as_bytes());
        key.extend_from_slice(hi.as_bytes());
        key
    }

    fn load_conversation(&self, id: &Uuid) -> Result<Option<Conversation>> {
        match self.conversations_tree.get(Self::id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| AppError::Database(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for SledStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<()> {
        let value = bincode::serialize(message)?;

        self.messages_tree.insert(Self::id_key(&message.id), value)?;
        self.room_index_tree.insert(
            Self::room_key(&message.room_id, &message.id),
            message.id.as_bytes().to_vec(),
        )?;
        self.messages_tree.flush()?;

        tracing::debug!(message_id = %message.id, room_id = %message.room_id, "Message saved to Sled");
        Ok(())
    }

    async fn get_message(&self, id: &Uuid) -> Result<Option<ChatMessage>> {
        match self.messages_tree.get(Self::id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_message(&self, message: &ChatMessage) -> Result<()> {
        let key = Self::id_key(&message.id);

        if !self.messages_tree.contains_key(&key)? {
            return Err(AppError::NotFound(format!(
                "Message {} not found",
                message.id
            )));
        }

        // Room and id never change, so the room index entry stays valid.
        let value = bincode::serialize(message)?;
        self.messages_tree.insert(&key, value)?;
        self.messages_tree.flush()?;

        tracing::debug!(message_id = %message.id, "Message updated in Sled");
        Ok(())
    }

    async fn list_room_messages(
        &self,
        room_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<HistoryPage> {
        let mut messages = Vec::new();

        // The prefix scan walks message ids in creation order.
        for entry in self.room_index_tree.scan_prefix(Self::room_prefix(room_id)) {
            let (_, id_bytes) = entry?;
            if let Some(bytes) = self.messages_tree.get(&id_bytes)? {
                let message: ChatMessage = bincode::deserialize(&bytes)?;
                if !message.deleted {
                    messages.push(message);
                }
            }
        }

        Ok(HistoryPage::slice(messages, page, limit))
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        let value = bincode::serialize(user)?;
        self.users_tree.insert(Self::id_key(&user.id), value)?;
        Ok(())
    }

    async fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        match self.users_tree.get(Self::id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
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

        let pair_key = Self::pair_key(&a, &b);

        if let Some(id_bytes) = self.pairs_tree.get(&pair_key)? {
            let id = Uuid::from_slice(&id_bytes)
                .map_err(|e| AppError::Database(format!("Corrupt pair index entry: {}", e)))?;
            let conversation = self.load_conversation(&id)?.ok_or_else(|| {
                AppError::Database(format!("Conversation {} missing for indexed pair", id))
            })?;
            return Ok((conversation, false));
        }

        // Write the conversation and membership first, then claim the pair
        // with compare-and-swap so a racing creator sees a complete record.
        let conversation = Conversation::private();
        let (lo, hi) = participant_pair(a, b);
        let participants = vec![
            Participant::new(conversation.id, lo),
            Participant::new(conversation.id, hi),
        ];

        self.conversations_tree.insert(
            Self::id_key(&conversation.id),
            bincode::serialize(&conversation)?,
        )?;
        self.participants_tree.insert(
            Self::id_key(&conversation.id),
            bincode::serialize(&participants)?,
        )?;

        match self.pairs_tree.compare_and_swap(
            &pair_key,
            None as Option<&[u8]>,
            Some(conversation.id.as_bytes().to_vec()),
        )? {
            Ok(()) => {
                self.db.flush_async().await.map_err(|e| {
                    AppError::Database(format!("Failed to flush conversation: {}", e))
                })?;
                tracing::debug!(
                    conversation_id = %conversation.id,
                    "Private conversation created"
                );
                Ok((conversation, true))
            }
            Err(cas) => {
                // Lost the race: discard our rows and return the winner's.
                self.conversations_tree
                    .remove(Self::id_key(&conversation.id))?;
                self.participants_tree
                    .remove(Self::id_key(&conversation.id))?;

                let winner_bytes = cas.current.ok_or_else(|| {
                    AppError::Database("Pair index entry vanished during race".to_string())
                })?;
                let winner_id = Uuid::from_slice(&winner_bytes)
                    .map_err(|e| AppError::Database(format!("Corrupt pair index entry: {}", e)))?;
                let conversation = self.load_conversation(&winner_id)?.ok_or_else(|| {
                    AppError::Database(format!(
                        "Conversation {} missing for indexed pair",
                        winner_id
                    ))
                })?;
                Ok((conversation, false))
            }
        }
    }

    async fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>> {
        self.load_conversation(id)
    }

    async fn conversation_participants(&self, id: &Uuid) -> Result<Vec<Participant>> {
        match self.participants_tree.get(Self::id_key(id))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn is_participant(&self, conversation_id: &Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self
            .conversation_participants(conversation_id)
            .await?
            .iter()
            .any(|p| p.user_id == user_id))
    }

    async fn touch_conversation(&self, id: &Uuid) -> Result<()> {
        let mut conversation = self
            .load_conversation(id)?
            .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", id)))?;

        conversation.touch();
        self.conversations_tree
            .insert(Self::id_key(id), bincode::serialize(&conversation)?)?;
        Ok(())
    }
}
