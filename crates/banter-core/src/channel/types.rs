//! Transport-agnostic inbound turn types.

use crate::models::Language;

/// Bot commands understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Close the active conversation and start a fresh one.
    Reset,
    /// Show the language menu.
    Language,
    /// Toggle spoken replies to voice notes.
    Speech,
    /// Anything else starting with a slash.
    Unknown,
}

/// What the user sent, already stripped of transport framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnContent {
    /// Plain conversational text.
    Text(String),
    /// A voice note to transcribe before the exchange.
    Voice { file_id: String, duration_secs: u32 },
    /// A slash command.
    Command(Command),
    /// A selection from the language menu.
    SetLanguage(Language),
    /// Content the relay does not handle (photos, stickers, documents).
    Unsupported,
}

/// One inbound turn as delivered by a transport.
#[derive(Debug, Clone)]
pub struct InboundTurn {
    /// Transport-level owner of the conversation (the chat id).
    pub owner_id: i64,
    /// Transport message id of the triggering message, used for replies.
    pub message_id: i64,
    pub content: TurnContent,
}

/// Parse a slash command. Returns `None` for ordinary text.
///
/// Commands may carry a bot-name suffix (`/reset@SomeBot`) in group chats;
/// the suffix is ignored.
pub fn parse_command(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    let name = first.split('@').next().unwrap_or(first);
    Some(match name {
        "/reset" => Command::Reset,
        "/language" => Command::Language,
        "/speech" => Command::Speech,
        _ => Command::Unknown,
    })
}
