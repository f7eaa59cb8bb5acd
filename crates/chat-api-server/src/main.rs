use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use chat_api_server::config::Settings;
use chat_api_server::handlers::build_router;
use chat_api_server::services::llm::build_chat_backend;
use chat_api_server::services::retriever::{HttpRetriever, Retriever};
use chat_api_server::services::{ChatPipeline, ContextBuilder, ConversationStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chat_api_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("🚀 Starting Chat API Server...");

    // Load configuration
    let settings = Arc::new(Settings::load()?);
    info!("✅ Configuration loaded");

    // Conversation memory
    let mut history = ConversationStore::new(settings.history.window);
    if let Some(max) = settings.history.max_conversations {
        history = history.with_max_conversations(max)?;
    }
    let history = Arc::new(history);

    // Chat backend with its resilience chain
    let backend = build_chat_backend(&settings)?;
    info!("✅ Chat backend ready: provider={}", settings.llm.provider);

    // Optional vector-search sidecar
    let retriever: Option<Arc<dyn Retriever>> = match &settings.rag.search_url {
        Some(url) => Some(Arc::new(HttpRetriever::new(
            url.clone(),
            settings.rag.top_k,
            Duration::from_secs(settings.rag.timeout_seconds),
        )?)),
        None => None,
    };
    if settings.rag.enabled && retriever.is_none() {
        warn!("RAG is enabled but no search_url is configured, replies stay plain");
    }

    let context = ContextBuilder::new(
        settings.prompts.system_preamble.clone(),
        settings.rag.context_max_chars,
    )
    .with_title(settings.prompts.context_title.clone());

    let pipeline = Arc::new(ChatPipeline::new(
        history,
        backend,
        retriever,
        context,
        settings.rag.enabled,
        settings.server.max_part_len,
    ));

    // Build router
    let app = build_router(pipeline, settings.clone());

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("🎯 Server listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
