use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::utils::error::InvalidConfig;
use crate::utils::text::clamp;

/// One piece of retrieved context. Source and score are optional because
/// not every search backend reports them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
}

/// Both variants are soft failures: the reply pipeline logs them and
/// continues without retrieved context.
#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error("vector search unavailable: {0}")]
    Unavailable(String),
    #[error("vector search failed: {0}")]
    Search(String),
}

/// Looks up context chunks relevant to a query.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, RetrieverError>;
}

/// Retriever backed by an HTTP vector-search sidecar. The embedding model
/// and store behind it stay opaque to this service.
pub struct HttpRetriever {
    client: Client,
    base_url: String,
    top_k: usize,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<RetrievedChunk>,
}

impl HttpRetriever {
    pub fn new(
        base_url: impl Into<String>,
        top_k: usize,
        timeout: Duration,
    ) -> Result<Self, InvalidConfig> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            top_k: top_k.max(1),
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, RetrieverError> {
        debug!("searching knowledge base, top_k={}", self.top_k);

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&SearchRequest {
                query,
                top_k: self.top_k,
            })
            .send()
            .await
            .map_err(|e| RetrieverError::Unavailable(format!("failed to reach search service: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrieverError::Search(format!(
                "search service error ({status}): {}",
                clamp(&body, 300)
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrieverError::Search(format!("failed to parse search response: {e}")))?;

        Ok(parsed.results)
    }
}
