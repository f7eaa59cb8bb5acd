use axum::{extract::Extension, Json};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Settings;
use crate::models::chat::{
    ChatRequest, ChatResponse, RagToggleResponse, ResetRequest, ResetResponse,
};
use crate::services::ChatPipeline;
use crate::utils::error::ApiError;

fn require_identity(channel: &str, user_id: &str) -> Result<(), ApiError> {
    if channel.trim().is_empty() || user_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "channel and user_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub async fn chat_handler(
    Extension(pipeline): Extension<Arc<ChatPipeline>>,
    Extension(settings): Extension<Arc<Settings>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    require_identity(&request.channel, &request.user_id)?;
    info!(
        "Chat request: channel={}, user={}, text_len={}",
        request.channel,
        request.user_id,
        request.text.len()
    );

    let parts = pipeline
        .reply(&request.channel, &request.user_id, &request.text)
        .await
        .map_err(|err| {
            // full detail stays in the log, the client gets a generic message
            error!(
                "text generation failed for {}:{}: {}",
                request.channel, request.user_id, err
            );
            ApiError::LlmError("text generation failed".to_string())
        })?;

    Ok(Json(ChatResponse {
        parts,
        provider: settings.llm.provider.clone(),
    }))
}

pub async fn toggle_rag_handler(
    Extension(pipeline): Extension<Arc<ChatPipeline>>,
) -> Json<RagToggleResponse> {
    let rag_enabled = pipeline.toggle_rag();
    info!("RAG toggled: enabled={}", rag_enabled);
    Json(RagToggleResponse { rag_enabled })
}

pub async fn reset_handler(
    Extension(pipeline): Extension<Arc<ChatPipeline>>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<ResetResponse>, ApiError> {
    require_identity(&request.channel, &request.user_id)?;
    pipeline.reset(&request.channel, &request.user_id);
    info!(
        "History reset: channel={}, user={}",
        request.channel, request.user_id
    );
    Ok(Json(ResetResponse {
        status: "ok".to_string(),
    }))
}
