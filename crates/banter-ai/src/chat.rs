//! Chat types and the backend trait consumed by the relay core.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Chat message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat message as sent to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set temperature
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// One incremental unit of a streamed response.
///
/// `text: None` with `done: false` is a keep-alive no-op; `done: true` marks
/// the end-of-stream sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDelta {
    pub text: Option<String>,
    pub done: bool,
}

impl StreamDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            text: Some(content.into()),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            text: None,
            done: true,
        }
    }
}

/// Boxed stream of response deltas
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// Chat backend trait
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Get model name
    fn model(&self) -> &str;

    /// Complete a chat request, returning the full response text
    async fn complete_chat(&self, request: CompletionRequest) -> Result<String>;

    /// Stream a chat request as incremental deltas
    fn stream_chat(&self, request: CompletionRequest) -> DeltaStream;
}
