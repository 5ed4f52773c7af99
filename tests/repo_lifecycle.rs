//! Integration tests for the repository registry, the indexing scheduler and
//! the index cache, run against the in-memory store with a stub embedder and
//! local git fixtures.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use repolens::errors::AppError;
use repolens::llm::Embedder;
use repolens::repo::indexer::{IndexCache, IndexingScheduler};
use repolens::repo::registry::{RegisterOutcome, RepoPhase, RepoRegistry, Visibility};
use repolens::store::memory::MemoryStore;
use repolens::store::{NewRepo, Store};
use repolens::vault::CredentialVault;

const MASTER_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

struct StubEmbedder {
    calls: AtomicUsize,
}

impl StubEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

fn init_fixture_repo(dir: &Path) {
    let repo = git2::Repository::init(dir).unwrap();

    std::fs::write(dir.join("main.py"), "def main():\n    print('hello')\n").unwrap();
    std::fs::create_dir_all(dir.join("docs")).unwrap();
    std::fs::write(dir.join("docs").join("guide.md"), "# Guide\n\nUsage notes.\n").unwrap();

    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
        .unwrap();
}

struct Harness {
    store: Arc<MemoryStore>,
    registry: RepoRegistry,
    scheduler: IndexingScheduler,
    embedder: Arc<StubEmbedder>,
    _work_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let vault = Arc::new(CredentialVault::new(MASTER_KEY, dyn_store.clone()).unwrap());
    let embedder = Arc::new(StubEmbedder::new());
    let work_dir = tempfile::tempdir().unwrap();

    let scheduler = IndexingScheduler::new(
        dyn_store.clone(),
        vault,
        embedder.clone(),
        IndexCache::new(),
        work_dir.path().join("checkouts"),
    );

    Harness {
        registry: RepoRegistry::new(dyn_store),
        store,
        scheduler,
        embedder,
        _work_dir: work_dir,
    }
}

/// Register a local fixture repository directly (local paths skip the URL
/// scheme validation that `register` applies to remote URLs).
async fn seed_local_repo(h: &Harness, fixture: &Path) -> String {
    let url = fixture.to_str().unwrap().to_string();
    let repo_id = repolens::repo::repo_id(&url);
    h.store
        .insert_repo_if_absent(NewRepo {
            repo_id: repo_id.clone(),
            repo_url: url,
            credential_id: None,
        })
        .await
        .unwrap();
    repo_id
}

async fn wait_until_indexed(store: &MemoryStore, repo_id: &str) -> bool {
    for _ in 0..100 {
        let repo = store.repo_by_id(repo_id).await.unwrap().unwrap();
        if repo.indexed_at.is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn wait_until_failed(store: &MemoryStore, repo_id: &str) -> bool {
    for _ in 0..100 {
        let repo = store.repo_by_id(repo_id).await.unwrap().unwrap();
        if repo.last_error.is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn registration_is_idempotent() {
    let h = harness();
    let url = "https://github.com/example/app";

    let (first_id, first) = h
        .registry
        .register(url, Visibility::Public, None)
        .await
        .unwrap();
    assert_eq!(first, RegisterOutcome::Registered);

    let (second_id, second) = h
        .registry
        .register(url, Visibility::Public, None)
        .await
        .unwrap();
    assert_eq!(second, RegisterOutcome::AlreadyRegistered);
    assert_eq!(first_id, second_id);

    let record = h.store.repo_by_id(&first_id).await.unwrap().unwrap();
    assert_eq!(record.repo_url, url);
}

#[tokio::test]
async fn private_registration_requires_a_credential() {
    let h = harness();
    let result = h
        .registry
        .register("https://github.com/example/secret", Visibility::Private, None)
        .await;
    assert!(matches!(result, Err(AppError::InvalidArgument(_))));
}

#[tokio::test]
async fn non_git_url_schemes_are_rejected() {
    let h = harness();
    let result = h
        .registry
        .register("ftp://example.com/repo", Visibility::Public, None)
        .await;
    assert!(matches!(result, Err(AppError::InvalidArgument(_))));
}

#[tokio::test]
async fn status_reflects_the_lifecycle() {
    let h = harness();
    let (repo_id, _) = h
        .registry
        .register("https://github.com/example/app", Visibility::Public, None)
        .await
        .unwrap();

    let fresh = h.registry.status(&repo_id).await.unwrap();
    assert_eq!(fresh.status, RepoPhase::Registered);
    assert!(fresh.last_indexed_at.is_none());

    h.store.mark_repo_failed(&repo_id, "clone timed out").await.unwrap();
    let failed = h.registry.status(&repo_id).await.unwrap();
    assert_eq!(failed.status, RepoPhase::Failed);
    assert_eq!(failed.error.as_deref(), Some("clone timed out"));

    h.store
        .mark_repo_indexed(&repo_id, chrono::Utc::now())
        .await
        .unwrap();
    let done = h.registry.status(&repo_id).await.unwrap();
    assert_eq!(done.status, RepoPhase::Completed);
    assert!(done.last_indexed_at.is_some());

    let missing = h.registry.status("does-not-exist").await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn indexing_job_completes_and_populates_the_cache() {
    let h = harness();
    let fixture = tempfile::tempdir().unwrap();
    init_fixture_repo(fixture.path());
    let repo_id = seed_local_repo(&h, fixture.path()).await;

    let started = h.scheduler.start(&repo_id).await.unwrap();
    assert_eq!(started.status, "started");
    assert_eq!(started.index_id, format!("idx_{}", repo_id));

    let completed = wait_until_indexed(&h.store, &repo_id).await;
    assert!(completed, "indexing job finished");

    let index = h.scheduler.cache().get(&repo_id).expect("cache populated");
    assert_eq!(index.file_content("main.py"), Some("def main():\n    print('hello')\n"));
    assert!(index
        .manifest
        .files
        .iter()
        .any(|f| f.path == "main.py" && f.functions == vec!["main"]));
    assert!(!index.chunks.is_empty());
}

#[tokio::test]
async fn start_indexing_unregistered_repo_is_not_found() {
    let h = harness();
    let result = h.scheduler.start("ffffffffffffffff").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn failed_jobs_surface_through_status() {
    let h = harness();
    let repo_id = {
        let url = "/nonexistent/path/to/nothing";
        let id = repolens::repo::repo_id(url);
        h.store
            .insert_repo_if_absent(NewRepo {
                repo_id: id.clone(),
                repo_url: url.to_string(),
                credential_id: None,
            })
            .await
            .unwrap();
        id
    };

    h.scheduler.start(&repo_id).await.unwrap();

    let failed = wait_until_failed(&h.store, &repo_id).await;
    assert!(failed, "failure was recorded");

    let view = h.registry.status(&repo_id).await.unwrap();
    assert_eq!(view.status, RepoPhase::Failed);
    assert!(view.error.is_some());
}

#[tokio::test]
async fn resolve_rehydrates_after_eviction() {
    let h = harness();
    let fixture = tempfile::tempdir().unwrap();
    init_fixture_repo(fixture.path());
    let repo_id = seed_local_repo(&h, fixture.path()).await;

    let first = h.scheduler.resolve(&repo_id).await.unwrap();
    let before = first.file_content("docs/guide.md").unwrap().to_string();
    let builds_before = h.embedder.calls.load(Ordering::SeqCst);

    // Simulated restart: the cache entry is gone, the registry row remains.
    assert!(h.scheduler.cache().evict(&repo_id));

    let rebuilt = h.scheduler.resolve(&repo_id).await.unwrap();
    assert_eq!(rebuilt.file_content("docs/guide.md").unwrap(), before);
    assert_eq!(
        h.embedder.calls.load(Ordering::SeqCst),
        builds_before + 1,
        "eviction forced exactly one rebuild"
    );
}

#[tokio::test]
async fn concurrent_cache_misses_build_once() {
    let h = harness();
    let fixture = tempfile::tempdir().unwrap();
    init_fixture_repo(fixture.path());
    let repo_id = seed_local_repo(&h, fixture.path()).await;

    let scheduler = Arc::new(h.scheduler.clone());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let s = scheduler.clone();
            let id = repo_id.clone();
            tokio::spawn(async move { s.resolve(&id).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(
        h.embedder.calls.load(Ordering::SeqCst),
        1,
        "per-id lock collapsed concurrent rebuilds into one"
    );
}

#[tokio::test]
async fn resolve_unknown_repo_is_not_found() {
    let h = harness();
    let result = h.scheduler.resolve("0000000000000000").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
