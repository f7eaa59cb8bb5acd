use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::chat::{ChatRole, ConversationKey};
use crate::services::context::ContextBuilder;
use crate::services::conversation::ConversationStore;
use crate::services::llm::{BackendError, ChatBackend};
use crate::services::retriever::Retriever;
use crate::utils::text::{chunk_text, sanitize};

/// Turn-by-turn chat orchestration: history in, context spliced,
/// backend called, reply recorded and split into sendable parts.
pub struct ChatPipeline {
    history: Arc<ConversationStore>,
    backend: Arc<dyn ChatBackend>,
    retriever: Option<Arc<dyn Retriever>>,
    context: ContextBuilder,
    rag_enabled: AtomicBool,
    max_part_len: usize,
}

impl ChatPipeline {
    pub fn new(
        history: Arc<ConversationStore>,
        backend: Arc<dyn ChatBackend>,
        retriever: Option<Arc<dyn Retriever>>,
        context: ContextBuilder,
        rag_enabled: bool,
        max_part_len: usize,
    ) -> Self {
        Self {
            history,
            backend,
            retriever,
            context,
            rag_enabled: AtomicBool::new(rag_enabled),
            max_part_len: max_part_len.max(1),
        }
    }

    pub fn rag_enabled(&self) -> bool {
        self.rag_enabled.load(Ordering::Relaxed)
    }

    pub fn set_rag_enabled(&self, enabled: bool) {
        self.rag_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flips retrieval augmentation and returns the new state.
    pub fn toggle_rag(&self) -> bool {
        !self.rag_enabled.fetch_xor(true, Ordering::Relaxed)
    }

    /// Runs one chat turn and returns the reply split into parts that fit
    /// the transport limit.
    ///
    /// The retrieved context travels to the model as an ephemeral system
    /// message spliced in right before the latest user message; it is never
    /// written to history. Retrieval failures downgrade the turn to a plain
    /// reply.
    pub async fn reply(
        &self,
        channel: &str,
        user_id: &str,
        text: &str,
    ) -> Result<Vec<String>, BackendError> {
        let key = ConversationKey::new(channel, user_id);
        let clean = sanitize(text);
        self.history.append(&key, ChatRole::User, clean.clone());

        let mut model_input = self.history.messages(&key);
        if self.rag_enabled() {
            if let Some(retriever) = &self.retriever {
                match retriever.retrieve(&clean).await {
                    Ok(chunks) => {
                        debug!("retrieved {} context chunks for {}", chunks.len(), key);
                        let at = model_input.len().saturating_sub(1);
                        model_input.insert(at, self.context.system_message(chunks));
                    }
                    Err(err) => {
                        warn!("retrieval failed for {}, replying without context: {}", key, err);
                    }
                }
            }
        }

        let answer = self.backend.send(&model_input).await?;
        self.history.append(&key, ChatRole::Assistant, answer.clone());
        Ok(chunk_text(&answer, self.max_part_len))
    }

    /// Forgets the conversation for one channel/user pair.
    pub fn reset(&self, channel: &str, user_id: &str) {
        self.history.reset(&ConversationKey::new(channel, user_id));
    }
}
