//! Integration tests for the admin API.
//!
//! Tests the HTTP endpoints end-to-end against an in-memory store.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use qqbot_common::LlmConfig;
use qqbot_relay::{
    build_router, create_state, ChatRequest, ChatResponse, GatewayLink, MemoryStore, Pacing,
    Provider, ProviderError, Relay, TokenUsage,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ChatResponse {
            model: request.model,
            content: last,
            usage: TokenUsage {
                input_tokens: 3,
                output_tokens: 2,
                total_tokens: 5,
            },
            finish_reason: Some("stop".into()),
            latency_ms: 1,
        })
    }
}

async fn setup() -> (Router, Arc<Relay>) {
    let provider: Arc<dyn Provider> = Arc::new(EchoProvider);
    let relay = Relay::load(
        Arc::new(MemoryStore::default()),
        Arc::clone(&provider),
        provider,
        Arc::new(GatewayLink::new()),
    )
    .await
    .unwrap()
    .with_pacing(Pacing::none());
    let relay = Arc::new(relay);

    let llm = LlmConfig {
        api_key: "sk-abcdef1234567890".into(),
        base_url: "http://llm.local/v1".into(),
        ..Default::default()
    };
    (build_router(create_state(Arc::clone(&relay), llm)), relay)
}

async fn request_json(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let body = if let Some(json_body) = body {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(serde_json::to_string(&json_body).unwrap())
    } else {
        Body::empty()
    };

    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, json)
}

fn private_event(user_id: i64, nickname: &str, text: &str) -> String {
    json!({
        "post_type": "message",
        "message_type": "private",
        "user_id": user_id,
        "sender": { "nickname": nickname },
        "raw_message": text
    })
    .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Health & Stats
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let (app, _) = setup().await;
    let (status, json) = request_json(app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "qqbot-relay");
}

#[tokio::test]
async fn test_stats_reports_gateway_status() {
    let (app, relay) = setup().await;

    let (status, json) = request_json(app.clone(), Method::GET, "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "offline");
    assert_eq!(json["totalMessages"], 0);
    assert_eq!(json["weeklyMessages"].as_array().unwrap().len(), 7);
    assert_eq!(json["activeUsers"], 0);

    let (_conn_id, _outbound) = relay.gateway().attach().await;
    let (_, json) = request_json(app, Method::GET, "/api/stats", None).await;
    assert_eq!(json["status"], "online");
}

#[tokio::test]
async fn test_stats_after_exchanges() {
    let (app, relay) = setup().await;
    relay.handle_raw(&private_event(1, "alice", "你好")).await;
    relay.handle_raw(&private_event(1, "alice", "再见")).await;
    relay.handle_raw(&private_event(2, "bob", "嗨")).await;

    let (_, json) = request_json(app, Method::GET, "/api/stats", None).await;
    assert_eq!(json["totalMessages"], 3);
    assert_eq!(json["todayMessages"], 3);
    assert_eq!(json["todayTokens"], 15);
    assert_eq!(json["modelUsage"]["gpt-3.5-turbo"], 3);
    assert_eq!(json["activeUsers"], 2);
    // The weekly ring only holds closed days.
    assert_eq!(json["weeklyMessages"][6], 0);

    let ranking = json["userRanking"].as_array().unwrap();
    assert_eq!(ranking.len(), 2);
    assert_eq!(ranking[0]["userId"], 1);
    assert_eq!(ranking[0]["nickname"], "alice");
    assert_eq!(ranking[0]["messageCount"], 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_config_masks_api_key() {
    let (app, _) = setup().await;
    let (status, json) = request_json(app, Method::GET, "/api/config", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["model"], "gpt-3.5-turbo");
    assert_eq!(json["maxHistoryLength"], 20);
    assert_eq!(json["summaryThreshold"], 10);
    assert_eq!(json["enableStream"], true);
    assert_eq!(json["apiKey"], "sk-****7890");
    assert_eq!(json["baseURL"], "http://llm.local/v1");
}

#[tokio::test]
async fn test_update_config() {
    let (app, relay) = setup().await;

    let (status, json) = request_json(
        app.clone(),
        Method::POST,
        "/api/config",
        Some(json!({
            "model": "gpt-4o-mini",
            "temperature": 1.2,
            "enableStream": false,
            "apiKey": "ignored"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["model"], "gpt-4o-mini");
    assert_eq!(json["enableStream"], false);
    assert_eq!(json["maxTokens"], 1000);
    assert_eq!(json["apiKey"], "sk-****7890");

    let current = relay.chat_config().await;
    assert_eq!(current.model, "gpt-4o-mini");
    assert!((current.temperature - 1.2).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_update_config_rejects_invalid_values() {
    let (app, relay) = setup().await;

    let (status, json) = request_json(
        app,
        Method::POST,
        "/api/config",
        Some(json!({ "model": "gpt-4o", "temperature": 3.5 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("temperature"));
    // Nothing is applied from a rejected update.
    assert_eq!(relay.chat_config().await.model, "gpt-3.5-turbo");
}

#[tokio::test]
async fn test_update_config_rejects_threshold_at_history_length() {
    let (app, relay) = setup().await;

    let (status, json) = request_json(
        app,
        Method::POST,
        "/api/config",
        Some(json!({ "maxHistoryLength": 2, "summaryThreshold": 5 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("summaryThreshold"));
    assert_eq!(relay.chat_config().await.max_history_length, 20);
}

// ─────────────────────────────────────────────────────────────────────────────
// Personas
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_personas_seeded_with_default() {
    let (app, _) = setup().await;
    let (status, json) = request_json(app, Method::GET, "/api/personas", None).await;

    assert_eq!(status, StatusCode::OK);
    let personas = json.as_array().unwrap();
    assert_eq!(personas.len(), 1);
    assert_eq!(personas[0]["name"], "默认助手");
    assert_eq!(personas[0]["order"], 1);
    assert_eq!(personas[0]["isDefault"], true);
}

#[tokio::test]
async fn test_persona_lifecycle() {
    let (app, relay) = setup().await;

    let (status, created) = request_json(
        app.clone(),
        Method::POST,
        "/api/personas",
        Some(json!({ "name": "猫娘", "prompt": "你是一只猫娘。" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["order"], 2);
    assert_eq!(created["isDefault"], false);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, updated) = request_json(
        app.clone(),
        Method::PUT,
        &format!("/api/personas/{id}"),
        Some(json!({ "prompt": "喵喵喵" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "猫娘");
    assert_eq!(updated["prompt"], "喵喵喵");

    let (status, json) = request_json(
        app.clone(),
        Method::POST,
        &format!("/api/personas/{id}/default"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(relay.personas().find_default().await.unwrap().id, id);

    let (_, list) = request_json(app.clone(), Method::GET, "/api/personas", None).await;
    let defaults = list
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["isDefault"] == true)
        .count();
    assert_eq!(defaults, 1);

    let (status, json) = request_json(
        app.clone(),
        Method::DELETE,
        &format!("/api/personas/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (status, _) = request_json(
        app,
        Method::DELETE,
        &format!("/api/personas/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_persona_requires_name() {
    let (app, _) = setup().await;
    let (status, json) = request_json(
        app,
        Method::POST,
        "/api/personas",
        Some(json!({ "name": "  ", "prompt": "x" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_update_unknown_persona() {
    let (app, _) = setup().await;
    let (status, _) = request_json(
        app.clone(),
        Method::PUT,
        "/api/personas/missing",
        Some(json!({ "name": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) =
        request_json(app, Method::POST, "/api/personas/missing/default", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_swap_persona_order() {
    let (app, relay) = setup().await;
    let first = relay.personas().first().await.unwrap();
    let (_, created) = request_json(
        app.clone(),
        Method::POST,
        "/api/personas",
        Some(json!({ "name": "猫娘", "prompt": "喵" })),
    )
    .await;
    let second_id = created["id"].as_str().unwrap().to_string();

    let (status, json) = request_json(
        app.clone(),
        Method::POST,
        "/api/personas/swap-order",
        Some(json!({ "id1": first.id, "id2": second_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (_, list) = request_json(app.clone(), Method::GET, "/api/personas", None).await;
    assert_eq!(list[0]["id"], second_id.as_str());
    assert_eq!(list[0]["order"], 1);
    assert_eq!(list[1]["id"], first.id.as_str());

    let (status, json) = request_json(
        app,
        Method::POST,
        "/api/personas/swap-order",
        Some(json!({ "id1": first.id, "id2": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_users_and_messages() {
    let (app, relay) = setup().await;
    relay.handle_raw(&private_event(42, "carol", "早上好")).await;

    let (status, json) = request_json(app.clone(), Method::GET, "/api/users", None).await;
    assert_eq!(status, StatusCode::OK);
    let users = json.as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["userId"], 42);
    assert_eq!(users[0]["nickname"], "carol");
    assert_eq!(users[0]["messageCount"], 1);
    assert_eq!(users[0]["tokenCount"], 5);
    assert!(users[0]["lastChatTime"].is_string());
    assert!(users[0].get("messages").is_none());

    let (status, json) =
        request_json(app, Method::GET, "/api/users/42/messages", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["nickname"], "carol");
    let messages = json["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "早上好");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["tokens"], 5);
}

#[tokio::test]
async fn test_messages_for_unknown_user() {
    let (app, _) = setup().await;
    let (status, json) =
        request_json(app, Method::GET, "/api/users/999/messages", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["userId"], 999);
    assert_eq!(json["user"]["nickname"], "未知用户");
    assert_eq!(json["messages"], json!([]));
}
