//! Typed conversation storage wrapper.
//!
//! Provides type-safe access to conversation storage, wrapping the byte-level
//! API from banter-storage with our Rust models.

use crate::models::{Conversation, Language};
use anyhow::Result;
use redb::Database;
use std::sync::Arc;

/// Contract the turn pipeline holds against conversation persistence.
///
/// The composite operations are derived from the primitives so every
/// implementation resolves "active conversation" the same way.
pub trait ConversationStore: Send + Sync {
    /// Create a new conversation record (fails if the id already exists).
    fn create(&self, conversation: &Conversation) -> Result<()>;

    /// Get a conversation by id.
    fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// Full-record upsert.
    fn save(&self, conversation: &Conversation) -> Result<()>;

    /// The single active conversation for an owner, if any.
    ///
    /// More than one active record for the same owner is a data-integrity
    /// fault and surfaces as an error rather than being silently resolved.
    fn get_active(&self, owner_id: i64) -> Result<Option<Conversation>>;

    /// Active conversation for the owner, created with defaults when none
    /// exists yet.
    fn get_or_create_active(&self, owner_id: i64) -> Result<Conversation> {
        if let Some(conversation) = self.get_active(owner_id)? {
            return Ok(conversation);
        }
        let conversation = Conversation::new(owner_id, Language::default(), false);
        self.create(&conversation)?;
        Ok(conversation)
    }

    /// Deactivate the owner's active conversation and start a fresh one that
    /// inherits its language and voice settings.
    ///
    /// Returns `None` when the owner has no active conversation to reset.
    fn reset(&self, owner_id: i64) -> Result<Option<Conversation>> {
        let Some(mut current) = self.get_active(owner_id)? else {
            return Ok(None);
        };
        current.active = false;
        self.save(&current)?;

        let fresh = Conversation::new(owner_id, current.language, current.voice_replies);
        self.create(&fresh)?;
        Ok(Some(fresh))
    }
}

/// Typed conversation storage wrapper around banter-storage::ConversationStorage.
///
/// Provides CRUD operations for conversations with automatic JSON
/// serialization.
#[derive(Debug, Clone)]
pub struct ConversationStorage {
    inner: banter_storage::ConversationStorage,
}

impl ConversationStorage {
    /// Create a new conversation storage instance.
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self {
            inner: banter_storage::ConversationStorage::new(db)?,
        })
    }

    /// List all conversations.
    ///
    /// Returns conversations sorted by updated_at descending (most recent
    /// first).
    pub fn list(&self) -> Result<Vec<Conversation>> {
        let raw = self.inner.list_raw()?;
        let mut conversations = Vec::new();
        for (_, bytes) in raw {
            let json = std::str::from_utf8(&bytes)?;
            let conversation: Conversation = serde_json::from_str(json)?;
            conversations.push(conversation);
        }

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(conversations)
    }

    /// List all conversations belonging to an owner.
    pub fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Conversation>> {
        let conversations = self.list()?;
        Ok(conversations
            .into_iter()
            .filter(|c| c.owner_id == owner_id)
            .collect())
    }

    /// Delete a conversation.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id)
    }

    /// Check if a conversation exists.
    pub fn exists(&self, id: &str) -> Result<bool> {
        self.inner.exists(id)
    }
}

impl ConversationStore for ConversationStorage {
    fn create(&self, conversation: &Conversation) -> Result<()> {
        if self.inner.exists(&conversation.id)? {
            return Err(anyhow::anyhow!(
                "Conversation {} already exists",
                conversation.id
            ));
        }
        let json = serde_json::to_string(conversation)?;
        self.inner.put_raw(&conversation.id, json.as_bytes())
    }

    fn get(&self, id: &str) -> Result<Option<Conversation>> {
        if let Some(bytes) = self.inner.get_raw(id)? {
            let json = std::str::from_utf8(&bytes)?;
            Ok(Some(serde_json::from_str(json)?))
        } else {
            Ok(None)
        }
    }

    fn save(&self, conversation: &Conversation) -> Result<()> {
        let json = serde_json::to_string(conversation)?;
        self.inner.put_raw(&conversation.id, json.as_bytes())
    }

    fn get_active(&self, owner_id: i64) -> Result<Option<Conversation>> {
        let mut active: Vec<Conversation> = self
            .list()?
            .into_iter()
            .filter(|c| c.owner_id == owner_id && c.active)
            .collect();

        if active.len() > 1 {
            return Err(anyhow::anyhow!(
                "{} active conversations for owner {}, expected at most one",
                active.len(),
                owner_id
            ));
        }

        Ok(active.pop())
    }
}
