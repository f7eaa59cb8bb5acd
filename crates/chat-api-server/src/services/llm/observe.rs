use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{error, info};

use crate::models::chat::ChatMessage;

use super::{BackendError, ChatBackend};

const DEFAULT_MAX_PREVIEW: usize = 200;

/// Logs every call through the wrapped backend: message count and a short
/// preview of the last message on the way in, reply length and elapsed time
/// on the way out. Outcomes pass through unchanged.
pub struct ObservedBackend<B> {
    inner: B,
    label: String,
    max_preview: usize,
}

impl<B> ObservedBackend<B> {
    pub fn new(inner: B, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
            max_preview: DEFAULT_MAX_PREVIEW,
        }
    }

    pub fn with_max_preview(mut self, max_preview: usize) -> Self {
        self.max_preview = max_preview;
        self
    }

    fn preview(&self, messages: &[ChatMessage]) -> String {
        messages
            .last()
            .map(|m| {
                m.content
                    .chars()
                    .take(self.max_preview)
                    .collect::<String>()
                    .replace('\n', " ")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl<B: ChatBackend> ChatBackend for ObservedBackend<B> {
    async fn send(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        info!(
            "{}: -> chat({} msg) last={:?}",
            self.label,
            messages.len(),
            self.preview(messages)
        );
        let start = Instant::now();
        let result = self.inner.send(messages).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(reply) => info!(
                "{}: <- chat({} chars) in {:.1} ms",
                self.label,
                reply.chars().count(),
                elapsed_ms
            ),
            Err(err) => error!("{}: chat failed in {:.1} ms: {}", self.label, elapsed_ms, err),
        }
        result
    }
}
