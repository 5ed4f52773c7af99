//! Integration tests for upstream credential custody: GitHub PAT validation
//! against a mock API and the encrypt-store-reveal-revoke cycle.

use std::sync::Arc;

use chrono::{Duration, Utc};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use repolens::auth::KeyIdentity;
use repolens::errors::AppError;
use repolens::store::memory::MemoryStore;
use repolens::store::Store;
use repolens::vault::github::GithubClient;
use repolens::vault::CredentialVault;

const MASTER_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn caller(email: &str) -> KeyIdentity {
    KeyIdentity {
        key_id: uuid::Uuid::new_v4(),
        owner_email: email.to_string(),
    }
}

#[tokio::test]
async fn pat_validation_reads_the_scopes_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "token ghp_valid"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("x-oauth-scopes", "repo, read:org"),
        )
        .mount(&server)
        .await;

    let client = GithubClient::new(server.uri());
    let granted = client
        .validate_pat("ghp_valid", &["repo".to_string()])
        .await
        .unwrap();

    // The header reports more than expected - the caller decides what to do
    // with the surplus.
    assert_eq!(granted, vec!["repo".to_string(), "read:org".to_string()]);
}

#[tokio::test]
async fn pat_validation_rejects_bad_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = GithubClient::new(server.uri());
    let result = client.validate_pat("ghp_bad", &["repo".to_string()]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn pat_validation_falls_back_to_capability_probes() {
    let server = MockServer::start().await;
    // No x-oauth-scopes header (fine-grained token).
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let client = GithubClient::new(server.uri());
    let granted = client
        .validate_pat("ghp_finegrained", &["repo".to_string()])
        .await
        .unwrap();
    assert_eq!(granted, vec!["repo".to_string()]);
}

#[tokio::test]
async fn probe_failure_means_missing_capability() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/repos"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = GithubClient::new(server.uri());
    let result = client.validate_pat("ghp_weak", &["repo".to_string()]).await;
    assert!(result.unwrap_err().to_string().contains("repo access"));
}

#[tokio::test]
async fn stored_tokens_are_encrypted_and_revealable() {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let vault = CredentialVault::new(MASTER_KEY, dyn_store).unwrap();

    let record = vault
        .store_token(
            "dev@example.com",
            "github",
            "ci token",
            "ghp_secret_token",
            vec!["repo".to_string()],
            Utc::now() + Duration::days(30),
        )
        .await
        .unwrap();

    // Nothing in the stored row contains the plaintext.
    let row = store.credential_by_id(record.id).await.unwrap().unwrap();
    assert_ne!(row.encrypted_secret, b"ghp_secret_token".to_vec());

    let revealed = vault.reveal(record.id).await.unwrap();
    assert_eq!(revealed, "ghp_secret_token");
}

#[tokio::test]
async fn reveal_refuses_revoked_and_expired_credentials() {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let vault = CredentialVault::new(MASTER_KEY, dyn_store).unwrap();

    let expired = vault
        .store_token(
            "dev@example.com",
            "github",
            "stale",
            "ghp_old",
            vec![],
            Utc::now() - Duration::days(1),
        )
        .await
        .unwrap();
    assert!(matches!(
        vault.reveal(expired.id).await,
        Err(AppError::InvalidArgument(_))
    ));

    let active = vault
        .store_token(
            "dev@example.com",
            "github",
            "live",
            "ghp_live",
            vec![],
            Utc::now() + Duration::days(1),
        )
        .await
        .unwrap();
    vault
        .revoke(active.id, &caller("dev@example.com"))
        .await
        .unwrap();
    assert!(matches!(
        vault.reveal(active.id).await,
        Err(AppError::Forbidden(_))
    ));
}

#[tokio::test]
async fn credential_revocation_is_ownership_checked() {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let vault = CredentialVault::new(MASTER_KEY, dyn_store).unwrap();

    let record = vault
        .store_token(
            "alice@example.com",
            "github",
            "alice token",
            "ghp_alice",
            vec![],
            Utc::now() + Duration::days(1),
        )
        .await
        .unwrap();

    let denied = vault.revoke(record.id, &caller("mallory@example.com")).await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));

    vault
        .revoke(record.id, &caller("alice@example.com"))
        .await
        .unwrap();
    // Idempotent second revoke.
    vault
        .revoke(record.id, &caller("alice@example.com"))
        .await
        .unwrap();

    let missing = vault
        .revoke(uuid::Uuid::new_v4(), &caller("alice@example.com"))
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}
