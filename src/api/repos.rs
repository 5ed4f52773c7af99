use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::repo::indexer::StartedIndexing;
use crate::repo::registry::{RepoStatusView, Visibility};
use crate::AppState;

#[derive(Deserialize)]
pub struct RegisterRepoRequest {
    #[allow(dead_code)]
    pub provider: String,
    pub repo_url: String,
    #[allow(dead_code)]
    pub branch: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    pub credential_id: Option<Uuid>,
}

fn default_visibility() -> Visibility {
    Visibility::Private
}

#[derive(Deserialize)]
pub struct FileQuery {
    pub path: String,
}

/// POST /repos/register - idempotent registration, no auth required.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRepoRequest>,
) -> Result<Json<Value>, AppError> {
    let (repo_id, outcome) = state
        .registry
        .register(&payload.repo_url, payload.visibility, payload.credential_id)
        .await?;

    Ok(Json(json!({
        "repo_id": repo_id,
        "status": outcome,
    })))
}

/// POST /repos/:repo_id/index - start the async indexing job.
pub async fn start_index(
    State(state): State<Arc<AppState>>,
    Path(repo_id): Path<String>,
) -> Result<Json<StartedIndexing>, AppError> {
    // A fresh snapshot is coming; drop stale conversations referencing it.
    state.conversations.clear_all();
    let started = state.scheduler.start(&repo_id).await?;
    Ok(Json(started))
}

/// GET /repos/:repo_id/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(repo_id): Path<String>,
) -> Result<Json<RepoStatusView>, AppError> {
    Ok(Json(state.registry.status(&repo_id).await?))
}

/// GET /repos/:repo_id/tree - manifest tree of an indexed repository.
pub async fn tree(
    State(state): State<Arc<AppState>>,
    Path(repo_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let repo = state.registry.get(&repo_id).await?;
    if repo.indexed_at.is_none() {
        return Err(AppError::InvalidArgument(
            "Repository is not indexed yet. Please index it first.".to_string(),
        ));
    }

    let index = state.scheduler.resolve(&repo_id).await?;
    Ok(Json(json!({
        "repo_id": repo_id,
        "tree": index.manifest.tree_entries(),
    })))
}

/// GET /repos/:repo_id/files?path= - file content from the indexed snapshot.
pub async fn file(
    State(state): State<Arc<AppState>>,
    Path(repo_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Value>, AppError> {
    let repo = state.registry.get(&repo_id).await?;
    if repo.indexed_at.is_none() {
        return Err(AppError::InvalidArgument(
            "Repository is not indexed yet. Please index it first.".to_string(),
        ));
    }

    let index = state.scheduler.resolve(&repo_id).await?;
    let content = index
        .file_content(&query.path)
        .ok_or(AppError::NotFound("file"))?;

    Ok(Json(json!({
        "repo_id": repo_id,
        "path": query.path,
        "content": content,
    })))
}
