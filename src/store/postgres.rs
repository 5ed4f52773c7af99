use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    ApiKeyPatch, ApiKeyRecord, CredentialRecord, IpAllowlist, KeyStatus, NewApiKey, NewCredential,
    NewRepo, RepoRecord, Store, UsageLogRecord,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// ── Row types ────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    key_hash: String,
    name: String,
    owner_email: String,
    status: String,
    environment: Option<String>,
    scopes: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
    ip_allowlist: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyRow> for ApiKeyRecord {
    fn from(row: ApiKeyRow) -> Self {
        ApiKeyRecord {
            id: row.id,
            key_hash: row.key_hash,
            name: row.name,
            owner_email: row.owner_email,
            status: KeyStatus::from_db(&row.status),
            environment: row.environment,
            scopes: serde_json::from_value(row.scopes).unwrap_or_default(),
            expires_at: row.expires_at,
            ip_allowlist: row
                .ip_allowlist
                .and_then(|v| serde_json::from_value::<IpAllowlist>(v).ok()),
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UsageLogRow {
    id: Uuid,
    request_id: Option<Uuid>,
    api_key_id: Option<Uuid>,
    endpoint: String,
    method: Option<String>,
    status_code: Option<i16>,
    duration_ms: Option<i32>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UsageLogRow> for UsageLogRecord {
    fn from(row: UsageLogRow) -> Self {
        UsageLogRecord {
            id: row.id,
            request_id: row.request_id,
            api_key_id: row.api_key_id,
            endpoint: row.endpoint,
            method: row.method,
            status_code: row.status_code,
            duration_ms: row.duration_ms,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RepoRow {
    repo_id: String,
    repo_url: String,
    credential_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    indexed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl From<RepoRow> for RepoRecord {
    fn from(row: RepoRow) -> Self {
        RepoRecord {
            repo_id: row.repo_id,
            repo_url: row.repo_url,
            credential_id: row.credential_id,
            created_at: row.created_at,
            indexed_at: row.indexed_at,
            last_error: row.last_error,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    owner_email: String,
    provider: String,
    label: String,
    encrypted_dek: Vec<u8>,
    dek_nonce: Vec<u8>,
    encrypted_secret: Vec<u8>,
    secret_nonce: Vec<u8>,
    granted_scopes: serde_json::Value,
    expires_at: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<CredentialRow> for CredentialRecord {
    fn from(row: CredentialRow) -> Self {
        CredentialRecord {
            id: row.id,
            owner_email: row.owner_email,
            provider: row.provider,
            label: row.label,
            encrypted_dek: row.encrypted_dek,
            dek_nonce: row.dek_nonce,
            encrypted_secret: row.encrypted_secret,
            secret_nonce: row.secret_nonce,
            granted_scopes: serde_json::from_value(row.granted_scopes).unwrap_or_default(),
            expires_at: row.expires_at,
            status: KeyStatus::from_db(&row.status),
            created_at: row.created_at,
        }
    }
}

// ── Store impl ───────────────────────────────────────────────

#[async_trait]
impl Store for PgStore {
    async fn insert_api_key(&self, key: NewApiKey) -> anyhow::Result<ApiKeyRecord> {
        let scopes = serde_json::to_value(&key.scopes)?;
        let ip_allowlist = key
            .ip_allowlist
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let row = sqlx::query_as::<_, ApiKeyRow>(
            r#"INSERT INTO api_keys (key_hash, name, owner_email, status, environment, scopes, expires_at, ip_allowlist)
               VALUES ($1, $2, $3, 'active', $4, $5, $6, $7)
               RETURNING id, key_hash, name, owner_email, status, environment, scopes, expires_at, ip_allowlist, created_at, last_used_at"#,
        )
        .bind(&key.key_hash)
        .bind(&key.name)
        .bind(&key.owner_email)
        .bind(&key.environment)
        .bind(scopes)
        .bind(key.expires_at)
        .bind(ip_allowlist)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn api_key_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<ApiKeyRecord>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT id, key_hash, name, owner_email, status, environment, scopes, expires_at, ip_allowlist, created_at, last_used_at FROM api_keys WHERE key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn api_key_by_id(&self, id: Uuid) -> anyhow::Result<Option<ApiKeyRecord>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT id, key_hash, name, owner_email, status, environment, scopes, expires_at, ip_allowlist, created_at, last_used_at FROM api_keys WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_api_keys(&self, owner_email: &str) -> anyhow::Result<Vec<ApiKeyRecord>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT id, key_hash, name, owner_email, status, environment, scopes, expires_at, ip_allowlist, created_at, last_used_at FROM api_keys WHERE owner_email = $1 ORDER BY created_at DESC",
        )
        .bind(owner_email)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_api_key(&self, id: Uuid, patch: ApiKeyPatch) -> anyhow::Result<bool> {
        if patch.is_empty() {
            return Ok(true);
        }

        let scopes = patch.scopes.as_ref().map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            r#"UPDATE api_keys
               SET name = COALESCE($1, name),
                   scopes = COALESCE($2, scopes),
                   environment = COALESCE($3, environment)
               WHERE id = $4"#,
        )
        .bind(&patch.name)
        .bind(scopes)
        .bind(&patch.environment)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_api_key_if_active(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE api_keys SET status = 'revoked' WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_api_key_usage(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_usage_log(&self, event: &UsageLogRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO api_usage_logs (id, request_id, api_key_id, endpoint, method, status_code, duration_ms, error_message, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(event.id)
        .bind(event.request_id)
        .bind(event.api_key_id)
        .bind(&event.endpoint)
        .bind(&event.method)
        .bind(event.status_code)
        .bind(event.duration_ms)
        .bind(&event.error_message)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn usage_logs_for_key(&self, api_key_id: Uuid) -> anyhow::Result<Vec<UsageLogRecord>> {
        let rows = sqlx::query_as::<_, UsageLogRow>(
            r#"SELECT id, request_id, api_key_id, endpoint, method, status_code, duration_ms, error_message, created_at
               FROM api_usage_logs
               WHERE api_key_id = $1
               ORDER BY created_at DESC"#,
        )
        .bind(api_key_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_repo_if_absent(&self, repo: NewRepo) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO repos (repo_id, repo_url, credential_id)
               VALUES ($1, $2, $3)
               ON CONFLICT (repo_id) DO NOTHING"#,
        )
        .bind(&repo.repo_id)
        .bind(&repo.repo_url)
        .bind(repo.credential_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn repo_by_id(&self, repo_id: &str) -> anyhow::Result<Option<RepoRecord>> {
        let row = sqlx::query_as::<_, RepoRow>(
            "SELECT repo_id, repo_url, credential_id, created_at, indexed_at, last_error FROM repos WHERE repo_id = $1",
        )
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn mark_repo_indexed(
        &self,
        repo_id: &str,
        indexed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE repos SET indexed_at = $1, last_error = NULL WHERE repo_id = $2")
            .bind(indexed_at)
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_repo_failed(&self, repo_id: &str, error: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE repos SET last_error = $1 WHERE repo_id = $2")
            .bind(error)
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_repo_error(&self, repo_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE repos SET last_error = NULL WHERE repo_id = $1")
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_credential(&self, cred: NewCredential) -> anyhow::Result<CredentialRecord> {
        let granted = serde_json::to_value(&cred.granted_scopes)?;

        let row = sqlx::query_as::<_, CredentialRow>(
            r#"INSERT INTO credentials (owner_email, provider, label, encrypted_dek, dek_nonce, encrypted_secret, secret_nonce, granted_scopes, expires_at, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active')
               RETURNING id, owner_email, provider, label, encrypted_dek, dek_nonce, encrypted_secret, secret_nonce, granted_scopes, expires_at, status, created_at"#,
        )
        .bind(&cred.owner_email)
        .bind(&cred.provider)
        .bind(&cred.label)
        .bind(&cred.encrypted_dek)
        .bind(&cred.dek_nonce)
        .bind(&cred.encrypted_secret)
        .bind(&cred.secret_nonce)
        .bind(granted)
        .bind(cred.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn credential_by_id(&self, id: Uuid) -> anyhow::Result<Option<CredentialRecord>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT id, owner_email, provider, label, encrypted_dek, dek_nonce, encrypted_secret, secret_nonce, granted_scopes, expires_at, status, created_at FROM credentials WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn revoke_credential_if_active(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE credentials SET status = 'revoked' WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
