//! Integration tests for the authorization gateway, run against the
//! in-memory store backend.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};

use repolens::auth::apikey::{hash_api_key, API_KEY_PREFIX};
use repolens::auth::gateway::IssueKeyRequest;
use repolens::auth::{AuthGateway, KeyIdentity, Revocation, UsageLogger};
use repolens::errors::AppError;
use repolens::store::memory::MemoryStore;
use repolens::store::{IpAllowlist, NewApiKey, ScopeSet, Store};

fn gateway() -> (AuthGateway, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let usage = UsageLogger::spawn(dyn_store.clone(), 64);
    (AuthGateway::new(dyn_store, usage), store)
}

fn ip(addr: &str) -> Option<IpAddr> {
    Some(addr.parse().unwrap())
}

async fn issue_key(gateway: &AuthGateway, email: &str, scopes: &[&str]) -> (String, KeyIdentity) {
    let issued = gateway
        .issue(IssueKeyRequest {
            email: email.to_string(),
            name: "test key".to_string(),
            environment: None,
            scopes: ScopeSet::from_slice(scopes),
            expires_at: None,
            ip_allowlist: None,
        })
        .await
        .unwrap();

    let identity = gateway
        .verify(Some(&issued.api_key), ip("127.0.0.1"), "/test", &[])
        .await
        .unwrap();
    (issued.api_key, identity)
}

#[tokio::test]
async fn verify_is_stable_for_a_valid_key() {
    let (gateway, _) = gateway();
    let (raw, identity) = issue_key(&gateway, "dev@example.com", &[]).await;

    for _ in 0..3 {
        let again = gateway
            .verify(Some(&raw), ip("127.0.0.1"), "/test", &[])
            .await
            .unwrap();
        assert_eq!(again.key_id, identity.key_id);
        assert_eq!(again.owner_email, "dev@example.com");
    }
}

#[tokio::test]
async fn issued_secret_is_prefixed_and_only_its_hash_is_stored() {
    let (gateway, store) = gateway();
    let (raw, identity) = issue_key(&gateway, "dev@example.com", &[]).await;

    assert!(raw.starts_with(API_KEY_PREFIX));
    let record = store.api_key_by_id(identity.key_id).await.unwrap().unwrap();
    assert_eq!(record.key_hash, hash_api_key(&raw));
    assert_ne!(record.key_hash, raw);
}

#[tokio::test]
async fn missing_and_unknown_secrets_are_unauthenticated() {
    let (gateway, _) = gateway();

    let missing = gateway.verify(None, ip("127.0.0.1"), "/test", &[]).await;
    assert!(matches!(missing, Err(AppError::Unauthenticated(_))));

    let blank = gateway
        .verify(Some("   "), ip("127.0.0.1"), "/test", &[])
        .await;
    assert!(matches!(blank, Err(AppError::Unauthenticated(_))));

    // Malformed and well-formed-but-unknown keys produce the same error.
    let garbage = gateway
        .verify(Some("not-a-key"), ip("127.0.0.1"), "/test", &[])
        .await;
    let unknown = gateway
        .verify(
            Some("rl_live_000000000000000000000000000000000000000000000000"),
            ip("127.0.0.1"),
            "/test",
            &[],
        )
        .await;
    match (garbage, unknown) {
        (Err(AppError::Unauthenticated(a)), Err(AppError::Unauthenticated(b))) => {
            assert_eq!(a, b)
        }
        other => panic!("expected two Unauthenticated errors, got {:?}", other),
    }
}

#[tokio::test]
async fn revoked_key_is_forbidden() {
    let (gateway, _) = gateway();
    let (raw, identity) = issue_key(&gateway, "dev@example.com", &[]).await;

    gateway.revoke(identity.key_id, &identity).await.unwrap();

    let result = gateway.verify(Some(&raw), ip("127.0.0.1"), "/test", &[]).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn expired_key_is_lazily_revoked_and_stays_unauthenticated() {
    let (gateway, store) = gateway();

    let raw = "rl_live_expiredkeyexpiredkeyexpiredkeyexpiredkey";
    store
        .insert_api_key(NewApiKey {
            key_hash: hash_api_key(raw),
            name: "old".to_string(),
            owner_email: "dev@example.com".to_string(),
            environment: None,
            scopes: ScopeSet::default(),
            expires_at: Some(Utc::now() - Duration::hours(1)),
            ip_allowlist: None,
        })
        .await
        .unwrap();

    // First observation revokes and fails as unauthenticated.
    let first = gateway.verify(Some(raw), ip("127.0.0.1"), "/t", &[]).await;
    assert!(matches!(first, Err(AppError::Unauthenticated(_))));

    let record = store.api_key_by_hash(&hash_api_key(raw)).await.unwrap().unwrap();
    assert_eq!(record.status.as_str(), "revoked");

    // Later calls keep failing as unauthenticated, not forbidden.
    let second = gateway.verify(Some(raw), ip("127.0.0.1"), "/t", &[]).await;
    assert!(matches!(second, Err(AppError::Unauthenticated(_))));
}

#[tokio::test]
async fn concurrent_expiry_observations_do_not_error() {
    let (gateway, store) = gateway();

    let raw = "rl_live_racingkeyracingkeyracingkeyracingkey0000";
    store
        .insert_api_key(NewApiKey {
            key_hash: hash_api_key(raw),
            name: "racer".to_string(),
            owner_email: "dev@example.com".to_string(),
            environment: None,
            scopes: ScopeSet::default(),
            expires_at: Some(Utc::now() - Duration::seconds(5)),
            ip_allowlist: None,
        })
        .await
        .unwrap();

    let gateway = Arc::new(gateway);
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let g = gateway.clone();
            tokio::spawn(async move { g.verify(Some(raw), ip("127.0.0.1"), "/t", &[]).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(
            matches!(result, Err(AppError::Unauthenticated(_))),
            "every concurrent observation fails as unauthenticated"
        );
    }

    let record = store.api_key_by_hash(&hash_api_key(raw)).await.unwrap().unwrap();
    assert_eq!(record.status.as_str(), "revoked");
}

#[tokio::test]
async fn revoke_is_idempotent() {
    let (gateway, _) = gateway();
    let (_, identity) = issue_key(&gateway, "dev@example.com", &[]).await;

    let first = gateway.revoke(identity.key_id, &identity).await.unwrap();
    assert_eq!(first, Revocation::Revoked);

    let second = gateway.revoke(identity.key_id, &identity).await.unwrap();
    assert_eq!(second, Revocation::AlreadyRevoked);
}

#[tokio::test]
async fn revoke_enforces_ownership_and_existence() {
    let (gateway, _) = gateway();
    let (_, alice) = issue_key(&gateway, "alice@example.com", &[]).await;
    let (_, mallory) = issue_key(&gateway, "mallory@example.com", &[]).await;

    let cross_owner = gateway.revoke(alice.key_id, &mallory).await;
    assert!(matches!(cross_owner, Err(AppError::Forbidden(_))));

    let missing = gateway.revoke(uuid::Uuid::new_v4(), &alice).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn ip_allowlist_blocks_other_sources() {
    let (gateway, store) = gateway();

    let raw = "rl_live_pinnedkeypinnedkeypinnedkeypinnedkey0000";
    store
        .insert_api_key(NewApiKey {
            key_hash: hash_api_key(raw),
            name: "pinned".to_string(),
            owner_email: "dev@example.com".to_string(),
            environment: None,
            scopes: ScopeSet::default(),
            expires_at: None,
            ip_allowlist: Some(IpAllowlist(vec!["10.0.0.1".to_string()])),
        })
        .await
        .unwrap();

    assert!(gateway.verify(Some(raw), ip("10.0.0.1"), "/t", &[]).await.is_ok());

    let denied = gateway.verify(Some(raw), ip("10.0.0.2"), "/t", &[]).await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn legacy_wrapped_allowlist_shape_still_applies() {
    let (gateway, store) = gateway();

    let allowlist: IpAllowlist = serde_json::from_str(r#"{"ips": ["10.0.0.1"]}"#).unwrap();
    let raw = "rl_live_wrappedkeywrappedkeywrappedkeywrapped00";
    store
        .insert_api_key(NewApiKey {
            key_hash: hash_api_key(raw),
            name: "wrapped".to_string(),
            owner_email: "dev@example.com".to_string(),
            environment: None,
            scopes: ScopeSet::default(),
            expires_at: None,
            ip_allowlist: Some(allowlist),
        })
        .await
        .unwrap();

    assert!(gateway.verify(Some(raw), ip("10.0.0.1"), "/t", &[]).await.is_ok());
    assert!(matches!(
        gateway.verify(Some(raw), ip("10.0.0.9"), "/t", &[]).await,
        Err(AppError::Forbidden(_))
    ));
}

#[tokio::test]
async fn missing_scopes_are_named_in_the_error() {
    let (gateway, _) = gateway();
    let (raw, _) = issue_key(&gateway, "dev@example.com", &["repo:read"]).await;

    let denied = gateway
        .verify(
            Some(&raw),
            ip("127.0.0.1"),
            "/chat",
            &["repo:read", "repo:explain"],
        )
        .await;

    match denied {
        Err(AppError::Forbidden(msg)) => {
            assert!(msg.contains("repo:explain"), "message was: {}", msg);
            assert!(!msg.contains("repo:read,"), "only missing scopes listed");
        }
        other => panic!("expected Forbidden, got {:?}", other),
    }
}

#[tokio::test]
async fn no_required_scopes_means_authentication_only() {
    let (gateway, _) = gateway();
    // Key with zero granted scopes still authenticates fine.
    let (raw, _) = issue_key(&gateway, "dev@example.com", &[]).await;
    assert!(gateway.verify(Some(&raw), ip("127.0.0.1"), "/t", &[]).await.is_ok());
}

#[tokio::test]
async fn successful_verify_records_a_usage_event() {
    let (gateway, store) = gateway();
    let (raw, identity) = issue_key(&gateway, "dev@example.com", &[]).await;

    gateway
        .verify(Some(&raw), ip("127.0.0.1"), "/manage-keys", &[])
        .await
        .unwrap();

    // The writer drains asynchronously; poll briefly.
    let mut logged = Vec::new();
    for _ in 0..50 {
        logged = store.usage_logs_for_key(identity.key_id).await.unwrap();
        if logged.iter().any(|l| l.endpoint == "/manage-keys") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(
        logged.iter().any(|l| l.endpoint == "/manage-keys"),
        "usage event for /manage-keys was recorded"
    );
}

#[tokio::test]
async fn usage_recording_never_blocks_on_a_full_queue() {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    // Tiny queue; the writer task cannot keep up with a synchronous burst.
    let usage = UsageLogger::spawn(dyn_store, 2);

    let key_id = uuid::Uuid::new_v4();
    for _ in 0..200 {
        usage.record_key_usage(key_id, "/burst");
    }

    // Overflow events were dropped, not queued or blocked on; whatever got
    // through still drains.
    let mut logged = Vec::new();
    for _ in 0..50 {
        logged = store.usage_logs_for_key(key_id).await.unwrap();
        if !logged.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(!logged.is_empty());
    assert!(logged.len() <= 200);
}

#[tokio::test]
async fn metadata_update_is_ownership_checked_and_partial() {
    let (gateway, store) = gateway();
    let (_, alice) = issue_key(&gateway, "alice@example.com", &[]).await;
    let (_, mallory) = issue_key(&gateway, "mallory@example.com", &[]).await;

    let patch = repolens::store::ApiKeyPatch {
        name: Some("renamed".to_string()),
        scopes: None,
        environment: None,
    };
    gateway.update(alice.key_id, &alice, patch).await.unwrap();

    let record = store.api_key_by_id(alice.key_id).await.unwrap().unwrap();
    assert_eq!(record.name, "renamed");
    // Untouched fields survive the partial update.
    assert_eq!(record.owner_email, "alice@example.com");

    let denied = gateway
        .update(
            alice.key_id,
            &mallory,
            repolens::store::ApiKeyPatch::default(),
        )
        .await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));
}
