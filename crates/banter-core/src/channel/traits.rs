//! Transport trait definition.
//!
//! A transport is the messaging side of the relay: it delivers the user's
//! turns inbound and carries replies, placeholder edits and voice notes
//! outbound.

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use super::types::InboundTurn;

/// Stream of inbound turns produced by a transport's receive loop.
pub type TurnStream = Pin<Box<dyn Stream<Item = InboundTurn> + Send>>;

/// Messaging transport contract consumed by the turn pipeline.
///
/// Sending returns the transport's message id so the caller can edit the
/// message later; progressive streaming is built entirely on send-then-edit.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Display name for logs.
    fn name(&self) -> &str;

    /// Send a text message. Returns the message id of the sent message.
    async fn send_message(&self, owner_id: i64, text: &str, reply_to: Option<i64>) -> Result<i64>;

    /// Replace the text of a previously sent message.
    async fn edit_message(&self, owner_id: i64, message_id: i64, text: &str) -> Result<()>;

    /// Send a voice note from a local audio file.
    async fn send_voice(&self, owner_id: i64, audio: &Path, reply_to: Option<i64>) -> Result<()>;

    /// Show the "typing" indicator.
    async fn send_typing(&self, owner_id: i64) -> Result<()>;

    /// Present the language selection menu.
    async fn prompt_language(&self, owner_id: i64) -> Result<()>;

    /// Download a transport file handle into a local temp file and return
    /// its path. The caller owns the file and removes it when done.
    async fn download_file(&self, file_id: &str) -> Result<PathBuf>;

    /// Start the receive loop. Turns are yielded as users send them.
    async fn start_receiving(&self) -> Result<TurnStream>;
}
