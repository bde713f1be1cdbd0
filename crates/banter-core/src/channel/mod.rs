//! Messaging-transport layer: inbound turn types, the transport contract and
//! the Telegram long-polling implementation.

pub mod audio;
pub mod telegram;
pub mod traits;
pub mod types;

pub use audio::{FfmpegTranscoder, Transcoder};
pub use telegram::{TelegramConfig, TelegramTransport};
pub use traits::{Transport, TurnStream};
pub use types::{Command, InboundTurn, TurnContent};
