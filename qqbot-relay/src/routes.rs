//! Admin HTTP API.
//!
//! Read and manage the relay from the dashboard:
//! - usage statistics and gateway status
//! - chat settings
//! - persona catalog
//! - user records and chat logs
//!
//! The API is unauthenticated; bind it to a trusted interface.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use qqbot_common::config::ChatConfigUpdate;
use qqbot_common::util::mask_secret;
use qqbot_common::{ChatConfig, LlmConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::onebot::UserId;
use crate::persona::{NewPersona, Persona, PersonaUpdate};
use crate::pipeline::Relay;
use crate::stats;
use crate::users::{ChatUserRecord, UserMessageLog};

const RANKING_SIZE: usize = 10;
const UNKNOWN_NICKNAME: &str = "未知用户";

// ============================================================================
// State
// ============================================================================

/// Shared state for the admin API.
pub struct ApiState {
    pub relay: Arc<Relay>,
    /// Connection settings shown (masked) by the config endpoint
    pub llm: LlmConfig,
}

pub fn create_state(relay: Arc<Relay>, llm: LlmConfig) -> Arc<ApiState> {
    Arc::new(ApiState { relay, llm })
}

// ============================================================================
// Errors
// ============================================================================

/// Error response with the status derived from the shared error type.
pub struct ApiError(qqbot_common::Error);

impl From<qqbot_common::Error> for ApiError {
    fn from(e: qqbot_common::Error) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Admin request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RankingEntry {
    user_id: UserId,
    nickname: String,
    message_count: u64,
    token_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    status: &'static str,
    total_messages: u64,
    today_messages: u64,
    total_tokens: u64,
    today_tokens: u64,
    weekly_messages: Vec<u64>,
    weekly_tokens: Vec<u64>,
    model_usage: BTreeMap<String, u64>,
    last_reset_date: String,
    active_users: usize,
    user_ranking: Vec<RankingEntry>,
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    #[serde(flatten)]
    chat: ChatConfig,
    #[serde(rename = "apiKey")]
    api_key: String,
    #[serde(rename = "baseURL")]
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserSummary {
    user_id: UserId,
    nickname: String,
    message_count: u64,
    token_count: u64,
    last_chat_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ChatUserRecord> for UserSummary {
    fn from(record: ChatUserRecord) -> Self {
        Self {
            user_id: record.user_id,
            nickname: record.nickname,
            message_count: record.message_count,
            token_count: record.token_count,
            last_chat_time: record.last_chat_time,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserRef {
    user_id: UserId,
    nickname: String,
}

#[derive(Debug, Serialize)]
struct UserMessagesResponse {
    user: UserRef,
    messages: Vec<UserMessageLog>,
}

#[derive(Debug, Deserialize)]
struct SwapOrderRequest {
    id1: String,
    id2: String,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "qqbot-relay",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_stats(State(state): State<Arc<ApiState>>) -> Json<StatsResponse> {
    let relay = &state.relay;
    let snapshot = relay.stats().snapshot(stats::today()).await;
    let status = if relay.gateway().is_online().await {
        "online"
    } else {
        "offline"
    };
    let user_ranking = relay
        .users()
        .ranking(RANKING_SIZE)
        .await
        .into_iter()
        .map(|r| RankingEntry {
            user_id: r.user_id,
            nickname: r.nickname,
            message_count: r.message_count,
            token_count: r.token_count,
        })
        .collect();

    Json(StatsResponse {
        status,
        total_messages: snapshot.total_messages,
        today_messages: snapshot.today_messages,
        total_tokens: snapshot.total_tokens,
        today_tokens: snapshot.today_tokens,
        weekly_messages: snapshot.weekly_messages,
        weekly_tokens: snapshot.weekly_tokens,
        model_usage: snapshot.model_usage,
        last_reset_date: snapshot.last_reset_date,
        active_users: snapshot.active_users.len(),
        user_ranking,
    })
}

fn config_response(state: &ApiState, chat: ChatConfig) -> ConfigResponse {
    ConfigResponse {
        chat,
        api_key: mask_secret(&state.llm.api_key),
        base_url: state.llm.base_url.clone(),
    }
}

async fn get_config(State(state): State<Arc<ApiState>>) -> Json<ConfigResponse> {
    let chat = state.relay.chat_config().await;
    Json(config_response(&state, chat))
}

async fn update_config(
    State(state): State<Arc<ApiState>>,
    Json(update): Json<ChatConfigUpdate>,
) -> ApiResult<ConfigResponse> {
    let chat = state.relay.update_chat_config(update).await?;
    Ok(Json(config_response(&state, chat)))
}

async fn list_personas(State(state): State<Arc<ApiState>>) -> Json<Vec<Persona>> {
    Json(state.relay.personas().list_sorted().await)
}

async fn create_persona(
    State(state): State<Arc<ApiState>>,
    Json(new): Json<NewPersona>,
) -> ApiResult<Persona> {
    Ok(Json(state.relay.personas().create(new).await?))
}

async fn update_persona(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(update): Json<PersonaUpdate>,
) -> ApiResult<Persona> {
    Ok(Json(state.relay.personas().update(&id, update).await?))
}

async fn delete_persona(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<SuccessResponse> {
    if state.relay.personas().delete(&id).await? {
        Ok(Json(SuccessResponse { success: true }))
    } else {
        Err(qqbot_common::Error::NotFound(format!("persona {id}")).into())
    }
}

async fn set_default_persona(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<SuccessResponse> {
    state.relay.personas().set_default(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn swap_persona_order(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SwapOrderRequest>,
) -> ApiResult<SuccessResponse> {
    let success = state
        .relay
        .personas()
        .swap_order(&req.id1, &req.id2)
        .await?;
    Ok(Json(SuccessResponse { success }))
}

async fn list_users(State(state): State<Arc<ApiState>>) -> Json<Vec<UserSummary>> {
    let users = state.relay.users().list().await;
    Json(users.into_iter().map(UserSummary::from).collect())
}

async fn user_messages(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<UserId>,
) -> Json<UserMessagesResponse> {
    let response = match state.relay.users().get(user_id).await {
        Some(record) => UserMessagesResponse {
            user: UserRef {
                user_id,
                nickname: record.nickname,
            },
            messages: record.messages,
        },
        None => UserMessagesResponse {
            user: UserRef {
                user_id,
                nickname: UNKNOWN_NICKNAME.into(),
            },
            messages: Vec::new(),
        },
    };
    Json(response)
}

// ============================================================================
// Router
// ============================================================================

/// Build the admin router with open CORS.
pub fn build_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(get_stats))
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/personas", get(list_personas).post(create_persona))
        .route("/api/personas/swap-order", post(swap_persona_order))
        .route(
            "/api/personas/:id",
            put(update_persona).delete(delete_persona),
        )
        .route("/api/personas/:id/default", post(set_default_persona))
        .route("/api/users", get(list_users))
        .route("/api/users/:id/messages", get(user_messages))
        .layer(cors)
        .with_state(state)
}
