//! Banter AI - the LLM boundary of the relay
//!
//! This crate provides:
//! - A closed upstream-failure taxonomy with total classification
//! - Bounded exponential backoff policy for retryable failures
//! - Chat completion client (streaming and non-streaming) for OpenAI
//! - Speech-to-text (Whisper) and text-to-speech clients

pub mod chat;
pub mod error;
mod http_client;
pub mod openai;
pub mod retry;
pub mod speech;

pub use chat::{ChatBackend, ChatMessage, CompletionRequest, DeltaStream, Role, StreamDelta};
pub use error::{LlmError, Result};
pub use openai::OpenAiClient;
pub use retry::RetryPolicy;
pub use speech::{OpenAiSpeechSynthesizer, OpenAiTranscriber, SpeechToText, TextToSpeech};
