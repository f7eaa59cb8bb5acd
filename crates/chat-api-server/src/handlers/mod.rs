use std::sync::Arc;

use axum::{
    extract::Extension,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::warn;

use crate::config::Settings;
use crate::services::ChatPipeline;

pub mod chat;
pub mod health;

pub fn build_router(pipeline: Arc<ChatPipeline>, settings: Arc<Settings>) -> Router {
    let cors = cors_layer(&settings.server.cors_origins);

    Router::new()
        .route("/healthz", get(health::health_check))
        .route("/v1/chat", post(chat::chat_handler))
        .route("/v1/toggle_rag", post(chat::toggle_rag_handler))
        .route("/v1/reset", post(chat::reset_handler))
        .layer(Extension(pipeline))
        .layer(Extension(settings))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}
