use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::AppState;

use super::authenticate;

#[derive(Deserialize)]
pub struct GithubPatRequest {
    pub token: String,
    pub label: String,
    pub scopes_expected: Vec<String>,
    pub expires_at: String,
}

/// POST /credentials/github/pat - validate a PAT against GitHub, reject
/// over-scoped or expired tokens, then encrypt and store it.
pub async fn register_github_pat(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<GithubPatRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = authenticate(&state, &headers, addr, "/credentials/github/pat", &[]).await?;

    let granted = state
        .github
        .validate_pat(&payload.token, &payload.scopes_expected)
        .await
        .map_err(|e| AppError::InvalidArgument(e.to_string()))?;

    let expected: HashSet<&str> = payload.scopes_expected.iter().map(String::as_str).collect();
    let extra: Vec<&str> = granted
        .iter()
        .map(String::as_str)
        .filter(|s| !expected.contains(s))
        .collect();
    if !extra.is_empty() {
        return Err(AppError::InvalidArgument(format!(
            "Token has extra scopes: {}",
            extra.join(", ")
        )));
    }

    let expires_at = parse_token_expiry(&payload.expires_at)?;

    let record = state
        .vault
        .store_token(
            &caller.owner_email,
            "github",
            &payload.label,
            &payload.token,
            granted,
            expires_at,
        )
        .await?;

    Ok(Json(json!({
        "credential_id": record.id,
        "status": "validated",
    })))
}

/// DELETE /credentials/:id - ownership-checked soft revocation.
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(credential_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let caller = authenticate(&state, &headers, addr, "/credentials", &[]).await?;
    state.vault.revoke(credential_id, &caller).await?;
    Ok(Json(json!({ "status": "revoked" })))
}

fn parse_token_expiry(raw: &str) -> Result<DateTime<Utc>, AppError> {
    let expires = DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| AppError::InvalidArgument("Invalid expires_at format".to_string()))?;

    if expires <= Utc::now() {
        return Err(AppError::InvalidArgument(
            "Token is already expired".to_string(),
        ));
    }

    Ok(expires)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_must_be_in_the_future() {
        assert!(parse_token_expiry("2099-01-01T00:00:00Z").is_ok());
        assert!(parse_token_expiry("2001-01-01T00:00:00Z").is_err());
        assert!(parse_token_expiry("not a date").is_err());
    }
}
