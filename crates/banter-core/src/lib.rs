//! Core of the banter relay: conversation state, per-owner session
//! admission, and the turn pipeline between a messaging transport and the
//! language model backend.

pub mod channel;
pub mod models;
pub mod paths;
pub mod session;
pub mod storage;
pub mod turn;

pub use channel::{
    Command, FfmpegTranscoder, InboundTurn, TelegramConfig, TelegramTransport, Transcoder,
    Transport, TurnContent, TurnStream,
};
pub use models::{Conversation, Language, Message, MessageRole};
pub use session::{InMemoryTurnRegistry, SessionGuard, TurnRegistry};
pub use storage::{ConversationStorage, ConversationStore};
pub use turn::{ExchangeConfig, ExchangeOutcome, Orchestrator, TurnDispatcher, TurnError};
