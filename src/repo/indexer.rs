//! Index construction and the process-local index cache.
//!
//! The cache is rebuildable state: absence of an entry is never an error,
//! only a reason to rehydrate from the registry's stored URL. Concurrent
//! misses for the same repository serialize on a per-id lock so the rebuild
//! runs exactly once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

use crate::errors::AppError;
use crate::llm::Embedder;
use crate::store::{KeyedLocks, RepoRecord, Store};
use crate::vault::CredentialVault;

use super::chunking;
use super::ingest::{self, SourceFile};
use super::manifest::{self, RepoManifest};

/// One embedded chunk of file content.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub file: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Opaque retrieval handle over one repository: the manifest snapshot, the
/// embedded chunks, and the raw file contents backing content lookups.
#[derive(Debug)]
pub struct RepoIndex {
    pub repo_id: String,
    pub manifest: RepoManifest,
    pub chunks: Vec<IndexedChunk>,
    files: HashMap<String, String>,
}

impl RepoIndex {
    /// Look up file content by exact relative path, falling back to a
    /// basename match so "show code of main.py" works without the full path.
    pub fn file_content(&self, name: &str) -> Option<&str> {
        if let Some(content) = self.files.get(name) {
            return Some(content);
        }
        self.files
            .iter()
            .find(|(path, _)| {
                path.rsplit('/').next().map(|base| base == name).unwrap_or(false)
            })
            .map(|(_, content)| content.as_str())
    }

    /// Top-k chunks by cosine similarity against a query embedding.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<&IndexedChunk> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .map(|c| (cosine_similarity(query, &c.embedding), c))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(_, c)| c).collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Process-local cache of constructed indexes, keyed by repo_id.
#[derive(Clone, Default)]
pub struct IndexCache {
    entries: Arc<DashMap<String, Arc<RepoIndex>>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, repo_id: &str) -> Option<Arc<RepoIndex>> {
        self.entries.get(repo_id).map(|e| e.clone())
    }

    pub fn insert(&self, index: Arc<RepoIndex>) {
        self.entries.insert(index.repo_id.clone(), index);
    }

    /// Drop a single entry. Lookups after this rehydrate from the registry.
    pub fn evict(&self, repo_id: &str) -> bool {
        self.entries.remove(repo_id).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[derive(Debug, Serialize)]
pub struct StartedIndexing {
    pub index_id: String,
    pub status: &'static str,
}

/// Runs index construction off the request path and keeps the cache and the
/// registry's indexing status in sync.
#[derive(Clone)]
pub struct IndexingScheduler {
    store: Arc<dyn Store>,
    vault: Arc<CredentialVault>,
    embedder: Arc<dyn Embedder>,
    cache: IndexCache,
    repos_dir: PathBuf,
    rebuild_locks: KeyedLocks,
}

impl IndexingScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Arc<CredentialVault>,
        embedder: Arc<dyn Embedder>,
        cache: IndexCache,
        repos_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            vault,
            embedder,
            cache,
            repos_dir,
            rebuild_locks: KeyedLocks::new(),
        }
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    /// Enqueue an indexing job and return immediately. The caller polls
    /// `status()`; a failed job is recorded on the repository row.
    pub async fn start(&self, repo_id: &str) -> Result<StartedIndexing, AppError> {
        let repo = self
            .store
            .repo_by_id(repo_id)
            .await?
            .ok_or(AppError::NotFound("repository"))?;

        self.store.clear_repo_error(&repo.repo_id).await?;

        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run_job(&repo).await {
                tracing::error!(repo_id = %repo.repo_id, "indexing failed: {:#}", e);
                if let Err(e) = scheduler
                    .store
                    .mark_repo_failed(&repo.repo_id, &format!("{:#}", e))
                    .await
                {
                    tracing::error!(repo_id = %repo.repo_id, "failed to record indexing failure: {}", e);
                }
            }
        });

        Ok(StartedIndexing {
            index_id: format!("idx_{}", repo_id),
            status: "started",
        })
    }

    async fn run_job(&self, repo: &RepoRecord) -> anyhow::Result<()> {
        let index = self.build_index(repo).await?;
        self.cache.insert(Arc::new(index));
        self.store
            .mark_repo_indexed(&repo.repo_id, Utc::now())
            .await?;
        tracing::info!(repo_id = %repo.repo_id, "repository indexed");
        Ok(())
    }

    /// Clone, walk, chunk and embed a repository into a fresh index. Private
    /// repositories get their stored credential decrypted and injected into
    /// the clone URL.
    pub async fn build_index(&self, repo: &RepoRecord) -> anyhow::Result<RepoIndex> {
        let clone_url = match repo.credential_id {
            Some(credential_id) => {
                let token = self
                    .vault
                    .reveal(credential_id)
                    .await
                    .map_err(|e| anyhow::anyhow!("credential unavailable: {}", e))?;
                ingest::authenticated_url(&repo.repo_url, &token)
            }
            None => repo.repo_url.clone(),
        };

        let dest = self.repos_dir.join(&repo.repo_id);
        let clone_dest = dest.clone();
        tokio::task::spawn_blocking(move || ingest::clone_repo(&clone_url, &clone_dest))
            .await??;

        self.build_from_path(&repo.repo_id, &dest).await
    }

    /// Build an index over an on-disk tree.
    pub async fn build_from_path(&self, repo_id: &str, path: &Path) -> anyhow::Result<RepoIndex> {
        let walk_root = path.to_path_buf();
        let files: Vec<SourceFile> =
            tokio::task::spawn_blocking(move || ingest::read_repo_files(&walk_root)).await?;

        let manifest = manifest::build_manifest(&files);

        let mut chunk_files = Vec::new();
        let mut texts = Vec::new();
        for file in &files {
            for piece in chunking::split_text(&file.content) {
                chunk_files.push(file.path.clone());
                texts.push(piece);
            }
        }

        let embeddings = self.embedder.embed(&texts).await?;
        anyhow::ensure!(
            embeddings.len() == texts.len(),
            "embedder returned {} vectors for {} chunks",
            embeddings.len(),
            texts.len()
        );

        let chunks = chunk_files
            .into_iter()
            .zip(texts)
            .zip(embeddings)
            .map(|((file, content), embedding)| IndexedChunk {
                file,
                content,
                embedding,
            })
            .collect();

        Ok(RepoIndex {
            repo_id: repo_id.to_string(),
            manifest,
            chunks,
            files: files.into_iter().map(|f| (f.path, f.content)).collect(),
        })
    }

    /// Cache-first index lookup. On miss the rebuild runs synchronously under
    /// the repository's lock, double-checking the cache after acquisition so
    /// concurrent misses build once.
    pub async fn resolve(&self, repo_id: &str) -> Result<Arc<RepoIndex>, AppError> {
        if let Some(index) = self.cache.get(repo_id) {
            return Ok(index);
        }

        let lock = self.rebuild_locks.get(repo_id);
        let _guard = lock.lock().await;

        if let Some(index) = self.cache.get(repo_id) {
            return Ok(index);
        }

        let repo = self
            .store
            .repo_by_id(repo_id)
            .await?
            .ok_or(AppError::NotFound("repository"))?;

        tracing::info!(repo_id = %repo_id, "index cache miss, rehydrating");
        let index = Arc::new(self.build_index(&repo).await?);
        self.cache.insert(index.clone());
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn cache_eviction_makes_absence() {
        let cache = IndexCache::new();
        cache.insert(Arc::new(RepoIndex {
            repo_id: "abc".to_string(),
            manifest: RepoManifest::default(),
            chunks: Vec::new(),
            files: HashMap::new(),
        }));
        assert!(cache.get("abc").is_some());
        assert!(cache.evict("abc"));
        assert!(cache.get("abc").is_none());
        assert!(!cache.evict("abc"));
    }

    #[test]
    fn file_content_matches_basename() {
        let mut files = HashMap::new();
        files.insert("src/app/main.py".to_string(), "print('hi')".to_string());
        let index = RepoIndex {
            repo_id: "abc".to_string(),
            manifest: RepoManifest::default(),
            chunks: Vec::new(),
            files,
        };
        assert_eq!(index.file_content("src/app/main.py"), Some("print('hi')"));
        assert_eq!(index.file_content("main.py"), Some("print('hi')"));
        assert_eq!(index.file_content("missing.py"), None);
    }
}
