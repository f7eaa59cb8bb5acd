use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

use chat_api_server::config::Settings;
use chat_api_server::handlers::build_router;
use chat_api_server::models::chat::ChatMessage;
use chat_api_server::services::llm::{BackendError, ChatBackend};
use chat_api_server::services::{ChatPipeline, ContextBuilder, ConversationStore};

struct CannedBackend {
    reply: String,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl CannedBackend {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn last_input_len(&self) -> usize {
        self.seen.lock().last().map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl ChatBackend for CannedBackend {
    async fn send(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        self.seen.lock().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

struct FailingBackend;

#[async_trait]
impl ChatBackend for FailingBackend {
    async fn send(&self, _messages: &[ChatMessage]) -> Result<String, BackendError> {
        Err(BackendError::fatal("api key rejected (sk-secret)"))
    }
}

fn test_app(backend: Arc<dyn ChatBackend>) -> Router {
    let settings = Arc::new(Settings::default());
    let pipeline = Arc::new(ChatPipeline::new(
        Arc::new(ConversationStore::new(settings.history.window)),
        backend,
        None,
        ContextBuilder::new(
            settings.prompts.system_preamble.clone(),
            settings.rag.context_max_chars,
        ),
        false,
        settings.server.max_part_len,
    ));
    build_router(pipeline, settings)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_healthz_reports_ok() {
    let app = test_app(CannedBackend::new("ignored"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_chat_round_trip() {
    let app = test_app(CannedBackend::new("hi there"));

    let response = app
        .oneshot(post_json(
            "/v1/chat",
            json!({"channel": "general", "user_id": "u1", "text": "hello"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["parts"], json!(["hi there"]));
    assert_eq!(body["provider"], "openrouter");
}

#[tokio::test]
async fn test_chat_failure_returns_generic_error() {
    let app = test_app(Arc::new(FailingBackend));

    let response = app
        .oneshot(post_json(
            "/v1/chat",
            json!({"channel": "general", "user_id": "u1", "text": "hello"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(response).await;
    assert_eq!(body["error"], "LlmError");
    assert_eq!(body["message"], "text generation failed");
    // provider detail must not leak to the client
    assert!(!body.to_string().contains("sk-secret"));
}

#[tokio::test]
async fn test_blank_identity_is_rejected() {
    let backend = CannedBackend::new("never");
    let app = test_app(backend.clone());

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/chat",
            json!({"channel": "", "user_id": "u1", "text": "hello"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], "BadRequest");
    assert_eq!(backend.last_input_len(), 0);

    let reset = app
        .oneshot(post_json(
            "/v1/reset",
            json!({"channel": "c", "user_id": "   "}),
        ))
        .await
        .unwrap();
    assert_eq!(reset.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_text_defaults_to_empty() {
    let backend = CannedBackend::new("fine");
    let app = test_app(backend.clone());

    let response = app
        .oneshot(post_json(
            "/v1/chat",
            json!({"channel": "general", "user_id": "u1"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(backend.last_input_len(), 1);
}

#[tokio::test]
async fn test_toggle_rag_flips_state_across_requests() {
    let app = test_app(CannedBackend::new("x"));

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/toggle_rag")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(read_json(first).await["rag_enabled"], true);

    let second = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/toggle_rag")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(read_json(second).await["rag_enabled"], false);
}

#[tokio::test]
async fn test_reset_forgets_history() {
    let backend = CannedBackend::new("sure");
    let app = test_app(backend.clone());

    for text in ["one", "two"] {
        app.clone()
            .oneshot(post_json(
                "/v1/chat",
                json!({"channel": "c", "user_id": "u", "text": text}),
            ))
            .await
            .unwrap();
    }
    // second turn carried user, assistant, user
    assert_eq!(backend.last_input_len(), 3);

    let reset = app
        .clone()
        .oneshot(post_json(
            "/v1/reset",
            json!({"channel": "c", "user_id": "u"}),
        ))
        .await
        .unwrap();
    assert_eq!(read_json(reset).await["status"], "ok");

    app.clone()
        .oneshot(post_json(
            "/v1/chat",
            json!({"channel": "c", "user_id": "u", "text": "three"}),
        ))
        .await
        .unwrap();
    assert_eq!(backend.last_input_len(), 1);
}
