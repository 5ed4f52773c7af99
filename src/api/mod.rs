use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::KeyIdentity;
use crate::errors::AppError;
use crate::AppState;

pub mod chat;
pub mod credentials;
pub mod keys;
pub mod logging;
pub mod repos;

/// Build the HTTP router. Authentication happens inside handlers via
/// `authenticate` so each route picks its own scope requirements.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Repository lifecycle - no auth required
        .route("/repos/register", post(repos::register))
        .route("/repos/:repo_id/index", post(repos::start_index))
        .route("/repos/:repo_id/status", get(repos::status))
        .route("/repos/:repo_id/tree", get(repos::tree))
        .route("/repos/:repo_id/files", get(repos::file))
        // API key management
        .route("/api-keys", post(keys::create).get(keys::list))
        .route("/api-keys/:id", patch(keys::update).delete(keys::revoke))
        .route("/revoke-keys", post(keys::revoke_by_body))
        .route("/manage-keys", get(keys::manage))
        // Conversational queries
        .route("/chat", post(chat::chat))
        .route("/chat/:chat_id", get(chat::history).delete(chat::delete))
        // Upstream credentials
        .route("/credentials/github/pat", post(credentials::register_github_pat))
        .route("/credentials/:id", delete(credentials::revoke))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            logging::request_logger,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "running" }))
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// Verify the bearer secret on a request, with optional scope requirements.
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    addr: SocketAddr,
    path: &str,
    required_scopes: &[&str],
) -> Result<KeyIdentity, AppError> {
    let token = bearer_token(headers);
    state
        .gateway
        .verify(token.as_deref(), Some(addr.ip()), path, required_scopes)
        .await
}
