//! The turn pipeline: admission, routing, streaming exchange, persistence.

pub mod buffer;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;

pub use dispatcher::TurnDispatcher;
pub use error::TurnError;
pub use orchestrator::{ExchangeConfig, ExchangeOutcome, Orchestrator};
