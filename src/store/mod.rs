pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── API key records ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Revoked,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Revoked => "revoked",
        }
    }

    /// Anything the database hands us that is not literally "active" is
    /// treated as revoked.
    pub fn from_db(s: &str) -> Self {
        if s == "active" {
            KeyStatus::Active
        } else {
            KeyStatus::Revoked
        }
    }
}

/// Normalized scope representation: a set of capability strings.
/// Wire payloads deserialize from a plain JSON array; duplicates collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(pub BTreeSet<String>);

impl ScopeSet {
    pub fn from_slice(scopes: &[&str]) -> Self {
        ScopeSet(scopes.iter().map(|s| s.to_string()).collect())
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Required scopes absent from this set, in the order they were asked for.
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|s| !self.0.contains(**s))
            .map(|s| s.to_string())
            .collect()
    }
}

/// IP allowlist. Accepts both the bare-list wire shape and the legacy
/// `{"ips": [...]}` wrapper; both normalize to a flat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IpAllowlist(pub Vec<String>);

impl<'de> Deserialize<'de> for IpAllowlist {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Bare(Vec<String>),
            Wrapped { ips: Vec<String> },
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Bare(ips) => IpAllowlist(ips),
            Wire::Wrapped { ips } => IpAllowlist(ips),
        })
    }
}

impl IpAllowlist {
    pub fn permits(&self, ip: &str) -> bool {
        self.0.iter().any(|allowed| allowed == ip)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub key_hash: String,
    pub name: String,
    pub owner_email: String,
    pub status: KeyStatus,
    pub environment: Option<String>,
    pub scopes: ScopeSet,
    pub expires_at: Option<DateTime<Utc>>,
    pub ip_allowlist: Option<IpAllowlist>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub key_hash: String,
    pub name: String,
    pub owner_email: String,
    pub environment: Option<String>,
    pub scopes: ScopeSet,
    pub expires_at: Option<DateTime<Utc>>,
    pub ip_allowlist: Option<IpAllowlist>,
}

/// Metadata-only partial update. `Some` sets the field, `None` leaves it
/// untouched. Hash, status and expiry are deliberately not updatable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiKeyPatch {
    pub name: Option<String>,
    pub scopes: Option<ScopeSet>,
    pub environment: Option<String>,
}

impl ApiKeyPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.scopes.is_none() && self.environment.is_none()
    }
}

// ── Usage logs ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct UsageLogRecord {
    pub id: Uuid,
    pub request_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub endpoint: String,
    pub method: Option<String>,
    pub status_code: Option<i16>,
    pub duration_ms: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Repositories ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RepoRecord {
    pub repo_id: String,
    pub repo_url: String,
    pub credential_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRepo {
    pub repo_id: String,
    pub repo_url: String,
    pub credential_id: Option<Uuid>,
}

// ── Upstream credentials ─────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub owner_email: String,
    pub provider: String,
    pub label: String,
    pub encrypted_dek: Vec<u8>,
    pub dek_nonce: Vec<u8>,
    pub encrypted_secret: Vec<u8>,
    pub secret_nonce: Vec<u8>,
    pub granted_scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub owner_email: String,
    pub provider: String,
    pub label: String,
    pub encrypted_dek: Vec<u8>,
    pub dek_nonce: Vec<u8>,
    pub encrypted_secret: Vec<u8>,
    pub secret_nonce: Vec<u8>,
    pub granted_scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

// ── Storage backend ──────────────────────────────────────────

/// Durable backend for credentials, repositories and usage logs.
/// Implementations: PgStore (Postgres) and MemoryStore (tests, local dev).
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_api_key(&self, key: NewApiKey) -> anyhow::Result<ApiKeyRecord>;
    async fn api_key_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<ApiKeyRecord>>;
    async fn api_key_by_id(&self, id: Uuid) -> anyhow::Result<Option<ApiKeyRecord>>;
    async fn list_api_keys(&self, owner_email: &str) -> anyhow::Result<Vec<ApiKeyRecord>>;
    async fn update_api_key(&self, id: Uuid, patch: ApiKeyPatch) -> anyhow::Result<bool>;
    /// Compare-and-set revocation. Returns true iff this call flipped the key
    /// from active to revoked; a concurrent or repeated call observes false.
    async fn revoke_api_key_if_active(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn touch_api_key_usage(&self, id: Uuid) -> anyhow::Result<()>;

    async fn insert_usage_log(&self, event: &UsageLogRecord) -> anyhow::Result<()>;
    async fn usage_logs_for_key(&self, api_key_id: Uuid) -> anyhow::Result<Vec<UsageLogRecord>>;

    /// Conditional insert keyed on repo_id. Returns false when a row already
    /// existed, leaving it unmodified.
    async fn insert_repo_if_absent(&self, repo: NewRepo) -> anyhow::Result<bool>;
    async fn repo_by_id(&self, repo_id: &str) -> anyhow::Result<Option<RepoRecord>>;
    async fn mark_repo_indexed(
        &self,
        repo_id: &str,
        indexed_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
    async fn mark_repo_failed(&self, repo_id: &str, error: &str) -> anyhow::Result<()>;
    async fn clear_repo_error(&self, repo_id: &str) -> anyhow::Result<()>;

    async fn insert_credential(&self, cred: NewCredential) -> anyhow::Result<CredentialRecord>;
    async fn credential_by_id(&self, id: Uuid) -> anyhow::Result<Option<CredentialRecord>>;
    async fn revoke_credential_if_active(&self, id: Uuid) -> anyhow::Result<bool>;
}

// ── Per-id serialization ─────────────────────────────────────

/// Lock table handing out one async mutex per string id. Mutating flows on a
/// given key id or repo id serialize through it; distinct ids stay
/// independent, so there is never a global lock.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
