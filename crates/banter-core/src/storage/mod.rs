//! Typed storage layer on top of banter-storage's byte-level API.

pub mod conversation;

pub use conversation::{ConversationStorage, ConversationStore};
