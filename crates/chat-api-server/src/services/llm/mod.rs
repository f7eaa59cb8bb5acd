//! Chat backend capability and its resilience wrappers.
//!
//! The concrete HTTP client sits innermost; rate limiting wraps it so every
//! physical attempt is throttled, retry wraps the limiter so attempts
//! re-acquire a token, and observation wraps everything so logged timings
//! cover queueing, retries and the network.

mod observe;
mod openai_compat;
mod rate_limit;
mod retry;

pub use observe::ObservedBackend;
pub use openai_compat::OpenAiCompatBackend;
pub use rate_limit::{RateLimitedBackend, TokenBucket};
pub use retry::{RetryPolicy, RetryingBackend};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Settings;
use crate::models::chat::ChatMessage;
use crate::utils::error::InvalidConfig;

/// One round trip to a chat-completion model.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, messages: &[ChatMessage]) -> Result<String, BackendError>;
}

#[async_trait]
impl<B: ChatBackend + ?Sized> ChatBackend for Arc<B> {
    async fn send(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        (**self).send(messages).await
    }
}

/// A failed backend call. `transient` marks failures worth retrying
/// (timeouts, connection errors, throttling, server-side errors).
#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct BackendError {
    pub transient: bool,
    pub detail: String,
}

impl BackendError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            transient: true,
            detail: detail.into(),
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            transient: false,
            detail: detail.into(),
        }
    }
}

struct ProviderPreset {
    base_url: &'static str,
    default_model: &'static str,
    key_env: Option<&'static str>,
}

fn provider_preset(provider: &str) -> Result<ProviderPreset, InvalidConfig> {
    match provider {
        "openrouter" => Ok(ProviderPreset {
            base_url: "https://openrouter.ai/api/v1",
            default_model: "deepseek/deepseek-chat-v3.1:free",
            key_env: Some("OPENROUTER_API_KEY"),
        }),
        "groq" => Ok(ProviderPreset {
            base_url: "https://api.groq.com/openai/v1",
            default_model: "llama3-8b-8192",
            key_env: Some("GROQ_API_KEY"),
        }),
        "openai" => Ok(ProviderPreset {
            base_url: "https://api.openai.com/v1",
            default_model: "gpt-4o-mini",
            key_env: Some("OPENAI_API_KEY"),
        }),
        "ollama" => Ok(ProviderPreset {
            base_url: "http://localhost:11434/v1",
            default_model: "llama3",
            key_env: None,
        }),
        other => Err(InvalidConfig(format!("unknown LLM provider: {other}"))),
    }
}

/// Builds the production chain around the configured provider:
/// observation over retry over rate limiting over the raw HTTP client.
/// Only transient failures are retried.
pub fn build_chat_backend(settings: &Settings) -> Result<Arc<dyn ChatBackend>, InvalidConfig> {
    let llm = &settings.llm;
    let provider = llm.provider.to_lowercase();
    let preset = provider_preset(&provider)?;

    let base_url = llm
        .base_url
        .clone()
        .unwrap_or_else(|| preset.base_url.to_string());
    let model = llm
        .model
        .clone()
        .unwrap_or_else(|| preset.default_model.to_string());
    let api_key = llm
        .api_key
        .clone()
        .or_else(|| preset.key_env.and_then(|var| std::env::var(var).ok()));

    let mut extra_headers = Vec::new();
    if provider == "openrouter" {
        if let Some(referer) = &llm.http_referer {
            extra_headers.push(("HTTP-Referer".to_string(), referer.clone()));
        }
        if let Some(title) = &llm.x_title {
            extra_headers.push(("X-Title".to_string(), title.clone()));
        }
    }

    let raw = OpenAiCompatBackend::new(
        base_url,
        api_key.as_deref(),
        model,
        Duration::from_secs(llm.timeout_seconds),
        &extra_headers,
    )?
    .with_sampling(llm.temperature, llm.top_p);

    let mut backend: Arc<dyn ChatBackend> = Arc::new(raw);

    if settings.limits.enabled {
        backend = Arc::new(RateLimitedBackend::new(
            backend,
            settings.limits.burst,
            settings.limits.rate_per_second,
        )?);
    }

    if settings.retry.enabled {
        let policy = RetryPolicy::new(
            settings.retry.attempts,
            Duration::from_millis(settings.retry.base_delay_ms),
            Duration::from_millis(settings.retry.max_delay_ms),
        );
        backend = Arc::new(
            RetryingBackend::new(backend, policy)
                .with_predicate(Arc::new(|err: &BackendError| err.transient)),
        );
    }

    Ok(Arc::new(ObservedBackend::new(
        backend,
        format!("LLM[{provider}]"),
    )))
}
