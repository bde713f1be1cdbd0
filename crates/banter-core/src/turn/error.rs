//! Turn-level failures and their fixed user-facing notices.

use banter_ai::LlmError;
use thiserror::Error;

/// Everything that can terminate a turn without a completed reply.
#[derive(Error, Debug)]
pub enum TurnError {
    /// A previous turn for this owner is still in flight.
    #[error("a turn is already in flight for this owner")]
    AlreadyProcessing,

    /// Classified upstream failure from the LLM boundary.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Conversation store failure.
    #[error("conversation store failure: {0}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for TurnError {
    fn from(error: anyhow::Error) -> Self {
        TurnError::Store(error)
    }
}

impl TurnError {
    /// The notice shown to the user for this failure.
    ///
    /// Total by construction: every variant maps to exactly one fixed string,
    /// so no turn ends without the user hearing something.
    pub fn user_message(&self) -> &'static str {
        match self {
            TurnError::AlreadyProcessing => {
                "Still processing your previous message.\nYou can forward it when it is done"
            }
            TurnError::Llm(LlmError::RateLimited { .. }) => "Too many requests, retrying failed",
            TurnError::Llm(LlmError::Unauthorized) => "Invalid API key",
            TurnError::Llm(LlmError::TokenLimit(_)) => {
                "Token limit has been reached, you can reset conversation"
            }
            TurnError::Llm(LlmError::Timeout) => {
                "The request timed out, you can forward your message"
            }
            TurnError::Llm(LlmError::Transport(_)) => {
                "Error occurred during processing, you can forward your message"
            }
            TurnError::Llm(LlmError::Unexpected(_)) => "Unexpected error",
            TurnError::Store(_) => "Unexpected error",
        }
    }
}
