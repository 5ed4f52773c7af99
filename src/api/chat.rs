use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::chat::{ChatReply, ChatRequest};
use crate::errors::AppError;
use crate::AppState;

use super::authenticate;

/// POST /chat - requires both repo scopes.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    authenticate(
        &state,
        &headers,
        addr,
        "/chat",
        &["repo:read", "repo:explain"],
    )
    .await?;

    let reply = state.engine.handle(payload).await?;
    Ok(Json(reply))
}

/// GET /chat/:chat_id - conversation history.
pub async fn history(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    authenticate(&state, &headers, addr, "/chat", &[]).await?;

    let convo = state
        .conversations
        .get(&chat_id)
        .ok_or(AppError::NotFound("chat"))?;

    Ok(Json(json!({
        "repo_id": convo.repo_id,
        "messages": convo
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect::<Vec<_>>(),
    })))
}

/// DELETE /chat/:chat_id
pub async fn delete(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    authenticate(&state, &headers, addr, "/chat", &[]).await?;

    if !state.conversations.delete(&chat_id) {
        return Err(AppError::NotFound("chat"));
    }

    Ok(Json(json!({ "status": "deleted" })))
}
