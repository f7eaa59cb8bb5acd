pub mod context;
pub mod conversation;
pub mod llm;
pub mod pipeline;
pub mod retriever;

pub use context::ContextBuilder;
pub use conversation::ConversationStore;
pub use pipeline::ChatPipeline;
