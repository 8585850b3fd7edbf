//! Full runs through the HTTP transport and JSON envelopes.

use std::sync::Arc;
use tracksync_engine::{
    Clock, HttpApi, ManualClock, RateLimitConfig, RateLimiter, SyncConfig, SyncOrchestrator,
};
use tracksync_protocol::{Endpoint, MessageKey, SyncMode};
use tracksync_store::{FileStore, LocalStore, MemoryStore};
use tracksync_testkit::prelude::*;

const SECRET: &str = "loopback-secret";

fn config(secret: &str) -> SyncConfig {
    SyncConfig::new("http://sync.test")
        .with_api_secret(secret)
        .with_user_key(TEST_USER_KEY)
        .with_batch_size(2)
        .with_rate_limit(RateLimitConfig::unlimited())
}

fn limiter() -> Arc<RateLimiter> {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
    Arc::new(RateLimiter::new(RateLimitConfig::unlimited(), clock))
}

fn server(remote: &[&str]) -> Arc<FingerprintServer> {
    let server = Arc::new(FingerprintServer::with_config(ServerConfig {
        page_size: 2,
        max_batch: 100,
    }));
    server.add_user(TEST_USER_KEY, 0);
    server.seed(TEST_USER_KEY, SyncMode::Pcm, &set(remote));
    server
}

#[tokio::test]
async fn sync_over_http_envelopes() {
    let server = server(&["bb22", "cc33", "dd44"]);
    let client = LoopbackClient::new(server.clone()).with_expected_bearer(SECRET);
    let config = config(SECRET);
    let api = Arc::new(HttpApi::new(&config, client));
    let store = Arc::new(MemoryStore::with_set(
        SyncMode::Pcm,
        set(&["aa11", "bb22"]),
    ));

    let orchestrator = SyncOrchestrator::new(config, api, store.clone(), limiter());
    let outcome = orchestrator.run().await;
    let summary = outcome.summary().expect("sync should succeed");

    let union = set(&["aa11", "bb22", "cc33", "dd44"]);
    assert_eq!(store.snapshot(SyncMode::Pcm), union);
    assert_eq!(server.fingerprints(TEST_USER_KEY, SyncMode::Pcm), union);
    assert_eq!(summary.pulled_to_client_count, 2);
    assert_eq!(summary.added_to_server_count, 1);
    assert!(summary.verified_hash_matched);
    assert_eq!(server.call_count(Endpoint::PullDiffPage), 1);
}

#[tokio::test]
async fn wrong_secret_fails_validation() {
    let server = server(&[]);
    let client = LoopbackClient::new(server.clone()).with_expected_bearer(SECRET);
    let config = config("not-the-secret");
    let api = Arc::new(HttpApi::new(&config, client));

    let orchestrator =
        SyncOrchestrator::new(config, api, Arc::new(MemoryStore::new()), limiter());
    let outcome = orchestrator.run().await;
    let failure = outcome.failure().expect("sync should fail");

    assert_eq!(failure.key, MessageKey::InvalidUserKey);
    assert!(server.calls().is_empty());
}

#[tokio::test]
async fn file_store_persists_merged_set() {
    let dir = tempfile::tempdir().unwrap();
    let server = server(&["cc33"]);
    let config = config(SECRET);
    let api = Arc::new(HttpApi::new(&config, LoopbackClient::new(server.clone())));

    let store = Arc::new(FileStore::new(dir.path()));
    store
        .save_fingerprint_set(SyncMode::Pcm, &set(&["aa11"]))
        .await
        .unwrap();

    let orchestrator = SyncOrchestrator::new(config, api, store, limiter());
    assert!(orchestrator.run().await.is_success());

    let reopened = FileStore::new(dir.path());
    assert_eq!(
        reopened.load_fingerprint_set(SyncMode::Pcm).await.unwrap(),
        set(&["aa11", "cc33"])
    );
}
