//! In-memory storage backend. Backs the integration tests and local
//! development without a Postgres instance; per-entry map locking gives the
//! same compare-and-set semantics the SQL statements provide.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    ApiKeyPatch, ApiKeyRecord, CredentialRecord, KeyStatus, NewApiKey, NewCredential, NewRepo,
    RepoRecord, Store, UsageLogRecord,
};

#[derive(Default)]
pub struct MemoryStore {
    keys: DashMap<Uuid, ApiKeyRecord>,
    logs: Mutex<Vec<UsageLogRecord>>,
    repos: DashMap<String, RepoRecord>,
    creds: DashMap<Uuid, CredentialRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_api_key(&self, key: NewApiKey) -> anyhow::Result<ApiKeyRecord> {
        if self.keys.iter().any(|k| k.key_hash == key.key_hash) {
            anyhow::bail!("duplicate key_hash");
        }

        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            key_hash: key.key_hash,
            name: key.name,
            owner_email: key.owner_email,
            status: KeyStatus::Active,
            environment: key.environment,
            scopes: key.scopes,
            expires_at: key.expires_at,
            ip_allowlist: key.ip_allowlist,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.keys.insert(record.id, record.clone());
        Ok(record)
    }

    async fn api_key_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<ApiKeyRecord>> {
        Ok(self
            .keys
            .iter()
            .find(|k| k.key_hash == key_hash)
            .map(|k| k.clone()))
    }

    async fn api_key_by_id(&self, id: Uuid) -> anyhow::Result<Option<ApiKeyRecord>> {
        Ok(self.keys.get(&id).map(|k| k.clone()))
    }

    async fn list_api_keys(&self, owner_email: &str) -> anyhow::Result<Vec<ApiKeyRecord>> {
        let mut keys: Vec<ApiKeyRecord> = self
            .keys
            .iter()
            .filter(|k| k.owner_email == owner_email)
            .map(|k| k.clone())
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn update_api_key(&self, id: Uuid, patch: ApiKeyPatch) -> anyhow::Result<bool> {
        match self.keys.get_mut(&id) {
            Some(mut key) => {
                if let Some(name) = patch.name {
                    key.name = name;
                }
                if let Some(scopes) = patch.scopes {
                    key.scopes = scopes;
                }
                if let Some(environment) = patch.environment {
                    key.environment = Some(environment);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_api_key_if_active(&self, id: Uuid) -> anyhow::Result<bool> {
        match self.keys.get_mut(&id) {
            Some(mut key) if key.status == KeyStatus::Active => {
                key.status = KeyStatus::Revoked;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_api_key_usage(&self, id: Uuid) -> anyhow::Result<()> {
        if let Some(mut key) = self.keys.get_mut(&id) {
            key.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_usage_log(&self, event: &UsageLogRecord) -> anyhow::Result<()> {
        self.logs.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn usage_logs_for_key(&self, api_key_id: Uuid) -> anyhow::Result<Vec<UsageLogRecord>> {
        let mut logs: Vec<UsageLogRecord> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.api_key_id == Some(api_key_id))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }

    async fn insert_repo_if_absent(&self, repo: NewRepo) -> anyhow::Result<bool> {
        match self.repos.entry(repo.repo_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(RepoRecord {
                    repo_id: repo.repo_id,
                    repo_url: repo.repo_url,
                    credential_id: repo.credential_id,
                    created_at: Utc::now(),
                    indexed_at: None,
                    last_error: None,
                });
                Ok(true)
            }
        }
    }

    async fn repo_by_id(&self, repo_id: &str) -> anyhow::Result<Option<RepoRecord>> {
        Ok(self.repos.get(repo_id).map(|r| r.clone()))
    }

    async fn mark_repo_indexed(
        &self,
        repo_id: &str,
        indexed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if let Some(mut repo) = self.repos.get_mut(repo_id) {
            repo.indexed_at = Some(indexed_at);
            repo.last_error = None;
        }
        Ok(())
    }

    async fn mark_repo_failed(&self, repo_id: &str, error: &str) -> anyhow::Result<()> {
        if let Some(mut repo) = self.repos.get_mut(repo_id) {
            repo.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn clear_repo_error(&self, repo_id: &str) -> anyhow::Result<()> {
        if let Some(mut repo) = self.repos.get_mut(repo_id) {
            repo.last_error = None;
        }
        Ok(())
    }

    async fn insert_credential(&self, cred: NewCredential) -> anyhow::Result<CredentialRecord> {
        let record = CredentialRecord {
            id: Uuid::new_v4(),
            owner_email: cred.owner_email,
            provider: cred.provider,
            label: cred.label,
            encrypted_dek: cred.encrypted_dek,
            dek_nonce: cred.dek_nonce,
            encrypted_secret: cred.encrypted_secret,
            secret_nonce: cred.secret_nonce,
            granted_scopes: cred.granted_scopes,
            expires_at: cred.expires_at,
            status: KeyStatus::Active,
            created_at: Utc::now(),
        };
        self.creds.insert(record.id, record.clone());
        Ok(record)
    }

    async fn credential_by_id(&self, id: Uuid) -> anyhow::Result<Option<CredentialRecord>> {
        Ok(self.creds.get(&id).map(|c| c.clone()))
    }

    async fn revoke_credential_if_active(&self, id: Uuid) -> anyhow::Result<bool> {
        match self.creds.get_mut(&id) {
            Some(mut cred) if cred.status == KeyStatus::Active => {
                cred.status = KeyStatus::Revoked;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
