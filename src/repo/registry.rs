//! Durable mapping from repository URL to deterministic id and indexing
//! status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::store::{NewRepo, RepoRecord, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterOutcome {
    Registered,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoPhase {
    Registered,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoStatusView {
    pub repo_id: String,
    pub status: RepoPhase,
    pub last_indexed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct RepoRegistry {
    store: Arc<dyn Store>,
}

impl RepoRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register a repository URL. Re-registering the same URL is a no-op that
    /// reports `AlreadyRegistered` with the same id.
    pub async fn register(
        &self,
        repo_url: &str,
        visibility: Visibility,
        credential_id: Option<Uuid>,
    ) -> Result<(String, RegisterOutcome), AppError> {
        if visibility == Visibility::Private && credential_id.is_none() {
            return Err(AppError::InvalidArgument(
                "credential_id required for private repositories".to_string(),
            ));
        }

        let parsed = url::Url::parse(repo_url)
            .map_err(|_| AppError::InvalidArgument("invalid repo_url".to_string()))?;
        if !matches!(parsed.scheme(), "https" | "http" | "git") {
            return Err(AppError::InvalidArgument(
                "only https://, http:// and git:// repository URLs are allowed".to_string(),
            ));
        }

        let repo_id = super::repo_id(repo_url);
        let inserted = self
            .store
            .insert_repo_if_absent(NewRepo {
                repo_id: repo_id.clone(),
                repo_url: repo_url.to_string(),
                credential_id,
            })
            .await?;

        let outcome = if inserted {
            RegisterOutcome::Registered
        } else {
            RegisterOutcome::AlreadyRegistered
        };
        Ok((repo_id, outcome))
    }

    pub async fn get(&self, repo_id: &str) -> Result<RepoRecord, AppError> {
        self.store
            .repo_by_id(repo_id)
            .await?
            .ok_or(AppError::NotFound("repository"))
    }

    /// Derived status. A repository that completed at least once stays
    /// `completed`; a failed attempt before the first success reports
    /// `failed` with the recorded error, and the error detail is surfaced in
    /// either case.
    pub async fn status(&self, repo_id: &str) -> Result<RepoStatusView, AppError> {
        let repo = self.get(repo_id).await?;

        let status = if repo.indexed_at.is_some() {
            RepoPhase::Completed
        } else if repo.last_error.is_some() {
            RepoPhase::Failed
        } else {
            RepoPhase::Registered
        };

        Ok(RepoStatusView {
            repo_id: repo.repo_id,
            status,
            last_indexed_at: repo.indexed_at,
            error: repo.last_error,
        })
    }
}
