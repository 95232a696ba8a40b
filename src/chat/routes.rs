//! REST endpoints for the conversation: submit a message, read or erase history.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::model::ConversationMessage;
use crate::agent::Operation;
use crate::auth::authorize;
use crate::server::{ApiError, AppState};

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    user_message_id: String,
    user_message: String,
    assistant_message_id: String,
    reply: String,
    timestamp: String,
    operations: Vec<Operation>,
}

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Serialize)]
struct MessageView {
    id: String,
    content: String,
    sender: &'static str,
    timestamp: String,
}

impl From<ConversationMessage> for MessageView {
    fn from(msg: ConversationMessage) -> Self {
        Self {
            id: msg.id.to_string(),
            sender: msg.sender.as_str(),
            timestamp: msg.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            content: msg.content,
        }
    }
}

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<MessageView>,
    total_count: u64,
}

/// POST /api/{user_id}/chat
async fn submit(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = authorize(state.verifier.as_ref(), &headers, &user_id)?;
    let Json(body) = body?;

    if let Err(retry_after) = state.rate_limiter.check(&user_id) {
        warn!(user_id = %user_id, "Chat rate limit exceeded");
        return Err(ApiError::RateLimited { retry_after });
    }

    let outcome = state.orchestrator.submit(&user_id, &body.message).await?;
    info!(user_id = %user_id, turn_id = %outcome.turn_id, "Chat turn served");

    Ok(Json(ChatResponse {
        user_message_id: outcome.user_message.id.to_string(),
        user_message: outcome.user_message.content,
        assistant_message_id: outcome.assistant_message.id.to_string(),
        reply: outcome.reply,
        timestamp: outcome.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        operations: outcome.operations,
    }))
}

/// GET /api/{user_id}/chat/history?limit=50&offset=0
async fn history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let requester = authorize(state.verifier.as_ref(), &headers, &user_id)?;
    let Query(params) = params?;

    let messages = state
        .log
        .list(&requester, &user_id, params.limit, params.offset)
        .await?;
    let total_count = state.log.count(&requester, &user_id).await?;

    Ok(Json(HistoryResponse {
        messages: messages.into_iter().map(MessageView::from).collect(),
        total_count,
    }))
}

/// DELETE /api/{user_id}/chat/history
async fn erase_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let requester = authorize(state.verifier.as_ref(), &headers, &user_id)?;
    let deleted = state.log.erase_all(&requester, &user_id).await?;
    info!(user_id = %user_id, deleted, "Chat history erased");
    Ok(Json(json!({"deleted": deleted})))
}

/// Build the chat REST routes.
pub fn chat_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/{user_id}/chat", post(submit))
        .route(
            "/api/{user_id}/chat/history",
            get(history).delete(erase_history),
        )
        .with_state(state)
}
