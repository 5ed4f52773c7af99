//! The authorization gateway: every authenticated request funnels through
//! `verify`, which enforces hash lookup, status, lazy expiry, IP allowlist
//! and scope policy before handing back the key's durable identity.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::apikey::{generate_api_key, hash_api_key};
use crate::errors::AppError;
use crate::store::{
    ApiKeyPatch, ApiKeyRecord, IpAllowlist, KeyStatus, KeyedLocks, NewApiKey, ScopeSet, Store,
};

use super::usage::UsageLogger;

/// Durable identity of a verified key, distinct from its secret or hash.
/// Carries the owner so downstream handlers can enforce ownership without a
/// second lookup.
#[derive(Debug, Clone)]
pub struct KeyIdentity {
    pub key_id: Uuid,
    pub owner_email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revocation {
    Revoked,
    AlreadyRevoked,
}

impl Revocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Revocation::Revoked => "revoked",
            Revocation::AlreadyRevoked => "already_revoked",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssueKeyRequest {
    pub email: String,
    pub name: String,
    pub environment: Option<String>,
    pub scopes: ScopeSet,
    pub expires_at: Option<String>,
    pub ip_allowlist: Option<IpAllowlist>,
}

#[derive(Debug, Serialize)]
pub struct IssuedKey {
    pub key_id: Uuid,
    /// The raw secret. Returned here once and never persisted.
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuthGateway {
    store: Arc<dyn Store>,
    usage: UsageLogger,
    locks: KeyedLocks,
}

impl AuthGateway {
    pub fn new(store: Arc<dyn Store>, usage: UsageLogger) -> Self {
        Self {
            store,
            usage,
            locks: KeyedLocks::new(),
        }
    }

    /// Verify a bearer secret and return the key identity.
    ///
    /// Scope checks are opt-in: an empty `required_scopes` authenticates
    /// without authorizing. Expiry is enforced lazily on read - an expired
    /// key is revoked here, under its per-id lock, before the call fails.
    pub async fn verify(
        &self,
        raw_secret: Option<&str>,
        source_ip: Option<IpAddr>,
        request_path: &str,
        required_scopes: &[&str],
    ) -> Result<KeyIdentity, AppError> {
        let raw_key = raw_secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Unauthenticated("Missing API key".to_string()))?;

        let key_hash = hash_api_key(raw_key);
        let key = self
            .store
            .api_key_by_hash(&key_hash)
            .await?
            .ok_or_else(AppError::invalid_api_key)?;

        // Expiry outranks the status check so that a lazily-revoked expired
        // key keeps failing as unauthenticated on every later call.
        if let Some(expires_at) = key.expires_at {
            if expires_at < Utc::now() {
                let lock = self.locks.get(&key.id.to_string());
                let _guard = lock.lock().await;
                // A concurrent verify may have revoked already; the
                // compare-and-set makes the second pass a no-op.
                self.store.revoke_api_key_if_active(key.id).await?;
                return Err(AppError::Unauthenticated(
                    "API key has expired".to_string(),
                ));
            }
        }

        if key.status != KeyStatus::Active {
            return Err(AppError::Forbidden("API key revoked".to_string()));
        }

        if let Some(allowlist) = &key.ip_allowlist {
            let ip = source_ip.map(|a| a.to_string()).unwrap_or_default();
            if !allowlist.permits(&ip) {
                return Err(AppError::Forbidden(format!(
                    "IP {} is not allowed to use this API key",
                    if ip.is_empty() { "unknown" } else { ip.as_str() }
                )));
            }
        }

        if !required_scopes.is_empty() {
            let missing = key.scopes.missing(required_scopes);
            if !missing.is_empty() {
                return Err(AppError::Forbidden(format!(
                    "Missing required scopes: {}",
                    missing.join(", ")
                )));
            }
        }

        self.usage.record_key_usage(key.id, request_path);

        Ok(KeyIdentity {
            key_id: key.id,
            owner_email: key.owner_email,
        })
    }

    /// Issue a new key. The raw secret appears only in the returned value.
    pub async fn issue(&self, req: IssueKeyRequest) -> Result<IssuedKey, AppError> {
        let expires_at = req.expires_at.as_deref().map(parse_expiry).transpose()?;

        let raw_key = generate_api_key();
        let record = self
            .store
            .insert_api_key(NewApiKey {
                key_hash: hash_api_key(&raw_key),
                name: req.name,
                owner_email: req.email,
                environment: req.environment,
                scopes: req.scopes,
                expires_at,
                ip_allowlist: req.ip_allowlist,
            })
            .await?;

        Ok(IssuedKey {
            key_id: record.id,
            api_key: raw_key,
            created_at: record.created_at,
        })
    }

    /// Revoke a key owned by the caller. Idempotent: a second call reports
    /// `AlreadyRevoked` instead of erroring.
    pub async fn revoke(
        &self,
        target_key_id: Uuid,
        caller: &KeyIdentity,
    ) -> Result<Revocation, AppError> {
        let target = self
            .store
            .api_key_by_id(target_key_id)
            .await?
            .ok_or(AppError::NotFound("API key"))?;

        if target.owner_email != caller.owner_email {
            return Err(AppError::Forbidden(
                "You are not allowed to revoke this API key".to_string(),
            ));
        }

        let lock = self.locks.get(&target_key_id.to_string());
        let _guard = lock.lock().await;
        if self.store.revoke_api_key_if_active(target_key_id).await? {
            Ok(Revocation::Revoked)
        } else {
            Ok(Revocation::AlreadyRevoked)
        }
    }

    /// Metadata-only update (name / scopes / environment), ownership-checked.
    pub async fn update(
        &self,
        target_key_id: Uuid,
        caller: &KeyIdentity,
        patch: ApiKeyPatch,
    ) -> Result<(), AppError> {
        let target = self
            .store
            .api_key_by_id(target_key_id)
            .await?
            .ok_or(AppError::NotFound("API key"))?;

        if target.owner_email != caller.owner_email {
            return Err(AppError::Forbidden(
                "You are not allowed to update this API key".to_string(),
            ));
        }

        self.store.update_api_key(target_key_id, patch).await?;
        Ok(())
    }

    /// All keys belonging to the caller's owner identity.
    pub async fn list(&self, caller: &KeyIdentity) -> Result<Vec<ApiKeyRecord>, AppError> {
        Ok(self.store.list_api_keys(&caller.owner_email).await?)
    }
}

fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| AppError::InvalidArgument("invalid expires_at format".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_expiry_accepts_rfc3339_with_zulu() {
        assert!(parse_expiry("2030-01-01T00:00:00Z").is_ok());
        assert!(parse_expiry("2030-01-01T00:00:00+05:30").is_ok());
    }

    #[test]
    fn parse_expiry_rejects_garbage() {
        assert!(matches!(
            parse_expiry("next tuesday"),
            Err(AppError::InvalidArgument(_))
        ));
    }
}
