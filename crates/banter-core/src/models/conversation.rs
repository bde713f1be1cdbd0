//! Conversation models shared by storage, the turn pipeline and transports.

use serde::{Deserialize, Serialize};

/// Who authored a message in the conversation history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A single entry in the conversation history. Entries are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation language. Drives the transcription hint and the voice
/// used for spoken replies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Ukrainian,
    Russian,
}

impl Language {
    pub fn all() -> [Language; 3] {
        [Language::English, Language::Ukrainian, Language::Russian]
    }

    /// BCP-47 tag used when synthesizing spoken replies.
    pub fn speech_tag(&self) -> &'static str {
        match self {
            Language::English => "en-US",
            Language::Ukrainian => "uk-UA",
            Language::Russian => "ru-RU",
        }
    }

    /// ISO 639-1 code used as the transcription hint.
    pub fn iso_code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Ukrainian => "uk",
            Language::Russian => "ru",
        }
    }

    /// Human-readable name shown in the language menu.
    pub fn label(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Ukrainian => "Ukrainian",
            Language::Russian => "Russian",
        }
    }

    /// Inverse of [`Language::label`], used to decode menu selections.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::all().into_iter().find(|l| l.label() == label)
    }
}

/// Durable record of one owner's chat thread.
///
/// An owner has at most one active conversation; resetting deactivates the
/// current record and starts a fresh one that inherits its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_id: i64,
    pub active: bool,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub language: Language,
    /// When set, replies to voice notes come back as synthesized speech.
    #[serde(default)]
    pub voice_replies: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(owner_id: i64, language: Language, voice_replies: bool) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id,
            active: true,
            history: Vec::new(),
            language,
            voice_replies,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message to the history and touch the update timestamp.
    pub fn add_message(&mut self, message: Message) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.history.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_conversation_is_active_and_empty() {
        let conversation = Conversation::new(42, Language::English, false);
        assert!(conversation.active);
        assert!(conversation.history.is_empty());
        assert_eq!(conversation.owner_id, 42);
        assert!(!conversation.voice_replies);
        assert_eq!(conversation.created_at, conversation.updated_at);
        assert!(!conversation.id.is_empty());
    }

    #[test]
    fn test_add_message_appends_in_order() {
        let mut conversation = Conversation::new(1, Language::English, false);
        conversation.add_message(Message::user("hello"));
        conversation.add_message(Message::assistant("hi there"));

        assert_eq!(conversation.history.len(), 2);
        assert_eq!(conversation.history[0], Message::user("hello"));
        assert_eq!(conversation.history[1], Message::assistant("hi there"));
        assert!(conversation.updated_at >= conversation.created_at);
    }

    #[test]
    fn test_language_codes() {
        assert_eq!(Language::English.iso_code(), "en");
        assert_eq!(Language::Ukrainian.iso_code(), "uk");
        assert_eq!(Language::Russian.iso_code(), "ru");
        assert_eq!(Language::English.speech_tag(), "en-US");
        assert_eq!(Language::Ukrainian.speech_tag(), "uk-UA");
        assert_eq!(Language::Russian.speech_tag(), "ru-RU");
    }

    #[test]
    fn test_language_label_round_trip() {
        for language in Language::all() {
            assert_eq!(Language::from_label(language.label()), Some(language));
        }
        assert_eq!(Language::from_label("Klingon"), None);
    }

    #[test]
    fn test_message_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::user("hey")).unwrap();
        assert!(json.contains("\"role\":\"user\""));

        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, MessageRole::User);
    }

    #[test]
    fn test_conversation_round_trip() {
        let mut conversation = Conversation::new(7, Language::Ukrainian, true);
        conversation.add_message(Message::user("привіт"));

        let json = serde_json::to_string(&conversation).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, conversation.id);
        assert_eq!(back.language, Language::Ukrainian);
        assert!(back.voice_replies);
        assert_eq!(back.history, conversation.history);
    }
}
