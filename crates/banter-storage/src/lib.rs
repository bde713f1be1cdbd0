//! Banter Storage - Low-level storage abstraction layer
//!
//! This crate provides the persistence layer for Banter, using redb as the
//! embedded database. It exposes byte-level APIs so the model types can live
//! in the core crate without a circular dependency.
//!
//! # Tables
//!
//! - `conversations` - Conversation records, keyed by conversation id

pub mod conversation;

use anyhow::Result;
use redb::Database;
use std::sync::Arc;

pub use conversation::ConversationStorage;

/// Central storage manager that initializes all storage subsystems
pub struct Storage {
    db: Arc<Database>,
    pub conversations: ConversationStorage,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will create the database file if it doesn't exist and initialize
    /// all required tables.
    pub fn new(path: &str) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);

        let conversations = ConversationStorage::new(db.clone())?;

        tracing::info!("Opened database at {}", path);
        Ok(Self { db, conversations })
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
