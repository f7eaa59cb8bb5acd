pub mod chat;

pub use chat::{ChatMessage, ChatRole, ConversationKey};
