use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::gateway::IssueKeyRequest;
use crate::auth::Revocation;
use crate::errors::AppError;
use crate::store::{ApiKeyPatch, IpAllowlist, ScopeSet};
use crate::AppState;

use super::authenticate;

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    pub email: String,
    pub name: String,
    pub environment: Option<String>,
    #[serde(default)]
    pub scopes: ScopeSet,
    pub expires_at: Option<String>,
    pub ip_allowlist: Option<IpAllowlist>,
}

#[derive(Deserialize)]
pub struct RevokeKeyRequest {
    pub api_key_id: Uuid,
}

/// POST /api-keys - issue a key. The raw secret appears in this response and
/// nowhere else, ever.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateApiKeyRequest>,
) -> Result<Json<Value>, AppError> {
    let issued = state
        .gateway
        .issue(IssueKeyRequest {
            email: payload.email,
            name: payload.name,
            environment: payload.environment,
            scopes: payload.scopes,
            expires_at: payload.expires_at,
            ip_allowlist: payload.ip_allowlist,
        })
        .await?;

    Ok(Json(json!({
        "key_id": issued.key_id,
        "api_key": issued.api_key,
        "created_at": issued.created_at,
    })))
}

/// GET /api-keys - lightweight caller-scoped listing. No logs, no
/// aggregation.
pub async fn list(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let caller = authenticate(&state, &headers, addr, "/api-keys", &[]).await?;
    let keys = state.gateway.list(&caller).await?;

    Ok(Json(Value::Array(
        keys.into_iter()
            .map(|k| {
                json!({
                    "key_id": k.id,
                    "name": k.name,
                    "environment": k.environment,
                    "scopes": k.scopes,
                    "last_used_at": k.last_used_at,
                })
            })
            .collect(),
    )))
}

/// PATCH /api-keys/:id - metadata-only partial update.
pub async fn update(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(key_id): Path<Uuid>,
    headers: HeaderMap,
    Json(patch): Json<ApiKeyPatch>,
) -> Result<Json<Value>, AppError> {
    let caller = authenticate(&state, &headers, addr, "/api-keys", &[]).await?;
    state.gateway.update(key_id, &caller, patch).await?;
    Ok(Json(json!({ "status": "updated" })))
}

/// DELETE /api-keys/:id - revoke (idempotent).
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(key_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let caller = authenticate(&state, &headers, addr, "/api-keys", &[]).await?;
    let outcome = state.gateway.revoke(key_id, &caller).await?;
    Ok(Json(revocation_body(outcome, key_id)))
}

/// POST /revoke-keys - same semantics as DELETE /api-keys/:id, target in the
/// body.
pub async fn revoke_by_body(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<RevokeKeyRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = authenticate(&state, &headers, addr, "/revoke-keys", &[]).await?;
    let outcome = state.gateway.revoke(payload.api_key_id, &caller).await?;
    Ok(Json(revocation_body(outcome, payload.api_key_id)))
}

fn revocation_body(outcome: Revocation, key_id: Uuid) -> Value {
    match outcome {
        Revocation::Revoked => json!({
            "status": "success",
            "message": "API key revoked successfully",
            "api_key_id": key_id,
        }),
        Revocation::AlreadyRevoked => json!({
            "status": "ok",
            "message": "API key already revoked",
            "api_key_id": key_id,
        }),
    }
}

/// GET /manage-keys - keys plus usage logs and aggregates, scoped to the
/// caller's owner identity.
pub async fn manage(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let caller = authenticate(&state, &headers, addr, "/manage-keys", &[]).await?;
    let keys = state.gateway.list(&caller).await?;

    let mut result = Vec::with_capacity(keys.len());
    for key in keys {
        let logs = state.store.usage_logs_for_key(key.id).await?;
        let error_count = logs
            .iter()
            .filter(|l| l.status_code.unwrap_or(200) >= 400)
            .count();

        result.push(json!({
            "api_key_id": key.id,
            "name": key.name,
            "status": key.status,
            "created_at": key.created_at,
            "last_used_at": key.last_used_at,
            "usage": {
                "total_requests": logs.len(),
                "error_count": error_count,
            },
            "logs": logs,
        }));
    }

    Ok(Json(json!({
        "user_email": caller.owner_email,
        "keys": result,
    })))
}
