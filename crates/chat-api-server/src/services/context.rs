use std::cmp::Ordering;

use crate::models::chat::ChatMessage;
use crate::services::retriever::RetrievedChunk;
use crate::utils::text::clamp;

/// Assembles the system message that carries retrieved context into a
/// prompt: a fixed preamble, then a numbered context block clamped to a
/// character budget.
pub struct ContextBuilder {
    preamble: String,
    title: String,
    max_chars: usize,
}

impl ContextBuilder {
    pub fn new(preamble: impl Into<String>, max_chars: usize) -> Self {
        Self {
            preamble: preamble.into(),
            title: "Knowledge base context".to_string(),
            max_chars,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Highest score first; a chunk without a score ranks as if it scored
    /// 1.0. Ties break on the source id so rendering is stable.
    pub fn rank(mut chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
        chunks.sort_by(|a, b| {
            let score_a = a.score.unwrap_or(1.0);
            let score_b = b.score.unwrap_or(1.0);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    a.source
                        .as_deref()
                        .unwrap_or("")
                        .cmp(b.source.as_deref().unwrap_or(""))
                })
        });
        chunks
    }

    /// Numbered context block under the title, clamped to the budget.
    pub fn render(&self, chunks: &[RetrievedChunk]) -> String {
        let mut lines = vec![self.title.clone(), String::new()];
        for (i, chunk) in chunks.iter().enumerate() {
            let source = chunk
                .source
                .as_deref()
                .map(|s| format!(" (source: {s})"))
                .unwrap_or_default();
            let score = chunk
                .score
                .map(|s| format!(" [score: {s:.3}]"))
                .unwrap_or_default();
            lines.push(format!("{}. {}{}{}", i + 1, chunk.content, source, score));
        }
        clamp(lines.join("\n").trim(), self.max_chars)
    }

    /// The spliceable system message. The preamble sits outside the context
    /// budget.
    pub fn system_message(&self, chunks: Vec<RetrievedChunk>) -> ChatMessage {
        let ranked = Self::rank(chunks);
        ChatMessage::system(format!("{}\n\n{}", self.preamble, self.render(&ranked)))
    }
}
