//! Short-term conversation memory.
//!
//! Windows are bounded per conversation and live for the process lifetime
//! only; nothing is persisted.

mod store;

pub use store::ConversationStore;
