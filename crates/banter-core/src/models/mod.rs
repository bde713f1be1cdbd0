pub mod conversation;

pub use conversation::{Conversation, Language, Message, MessageRole};
