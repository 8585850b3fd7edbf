//! End-to-end sync runs against the in-memory backend.

use std::time::Duration;
use tracksync_engine::{Notice, ProgressEvent, RateLimitConfig, RunState, SyncOutcome, SyncPhase};
use tracksync_protocol::{Endpoint, SyncMode};
use tracksync_testkit::prelude::*;

#[tokio::test]
async fn both_sides_end_with_the_union() {
    let harness = TestHarness::new(set(&["aa11", "bb22"]), set(&["bb22", "cc33"]));

    let outcome = harness.orchestrator.run().await;
    let summary = outcome.summary().expect("sync should succeed").clone();

    let union = set(&["aa11", "bb22", "cc33"]);
    assert_eq!(harness.local(), union);
    assert_eq!(harness.remote(), union);

    assert_eq!(summary.client_initial_count, 2);
    assert_eq!(summary.server_initial_count, 2);
    assert_eq!(summary.added_to_server_count, 1);
    assert_eq!(summary.pulled_to_client_count, 1);
    assert_eq!(summary.total_client_count_after, 3);
    assert_eq!(summary.total_server_count_after, 3);
    assert!(summary.verified_hash_matched);

    assert_eq!(
        harness.server.calls(),
        vec![
            Endpoint::ValidateUserKey,
            Endpoint::Check,
            Endpoint::BidirectionalDiff,
            Endpoint::AnalyzeDiff,
            Endpoint::PullDiffPage,
            Endpoint::Add,
            Endpoint::Check,
        ]
    );
    assert_eq!(harness.store.save_count(), 1);
    assert_eq!(harness.orchestrator.phase(), SyncPhase::Success);
    assert_eq!(harness.reporter.summary(), Some(summary));
}

#[tokio::test]
async fn requests_are_paced() {
    let harness = TestHarness::new(set(&["aa11", "bb22"]), set(&["bb22", "cc33"]));
    harness.orchestrator.run().await;

    // Seven requests: the first goes out at once, the rest wait one interval.
    assert_eq!(harness.clock.sleeps(), vec![Duration::from_millis(650); 6]);
}

#[tokio::test]
async fn progress_is_monotonic_and_complete() {
    let harness = TestHarness::builder()
        .local(fingerprints(0..25))
        .remote(fingerprints(10..40))
        .batch_size(5)
        .page_size(4)
        .rate_limit(RateLimitConfig::unlimited())
        .build();

    assert!(harness.orchestrator.run().await.is_success());

    let percents = harness.reporter.percents();
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]), "{percents:?}");
    assert_eq!(percents.first(), Some(&5));
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(harness.reporter.states(), vec![RunState::Syncing, RunState::Success]);

    // 25 local fingerprints in batches of five, 15 remote-only in pages of four.
    assert_eq!(harness.server.call_count(Endpoint::BidirectionalDiff), 5);
    assert_eq!(harness.server.call_count(Endpoint::PullDiffPage), 4);
    assert_eq!(harness.server.call_count(Endpoint::Add), 2);
    assert_eq!(harness.local(), fingerprints(0..40));
}

#[tokio::test]
async fn matching_sets_skip_the_diff() {
    let harness = TestHarness::new(set(&["aa11", "bb22"]), set(&["BB22", "aa11"]));

    let outcome = harness.orchestrator.run().await;
    let summary = outcome.summary().expect("sync should succeed");

    assert!(summary.verified_hash_matched);
    assert_eq!(summary.added_to_server_count, 0);
    assert_eq!(summary.pulled_to_client_count, 0);
    assert_eq!(
        harness.server.calls(),
        vec![Endpoint::ValidateUserKey, Endpoint::Check]
    );
    assert_eq!(harness.store.save_count(), 0);
    assert!(harness.reporter.notices().contains(&Notice::AlreadyLatest));
    assert_eq!(harness.reporter.percents().last(), Some(&100));
}

#[tokio::test]
async fn empty_local_set_pulls_everything() {
    let harness = TestHarness::builder()
        .remote(fingerprints(0..5))
        .page_size(2)
        .build();

    let outcome = harness.orchestrator.run().await;
    let summary = outcome.summary().expect("sync should succeed");

    assert_eq!(harness.local(), fingerprints(0..5));
    assert_eq!(summary.pulled_to_client_count, 5);
    assert_eq!(summary.added_to_server_count, 0);
    assert_eq!(harness.server.call_count(Endpoint::BidirectionalDiff), 0);
    assert_eq!(harness.server.call_count(Endpoint::PullDiffPage), 3);
    assert_eq!(harness.server.call_count(Endpoint::Add), 0);
}

#[tokio::test]
async fn empty_remote_set_receives_everything() {
    let harness = TestHarness::builder()
        .local(fingerprints(0..5))
        .batch_size(2)
        .build();

    let outcome = harness.orchestrator.run().await;
    let summary = outcome.summary().expect("sync should succeed");

    assert_eq!(harness.remote(), fingerprints(0..5));
    assert_eq!(summary.added_to_server_count, 5);
    assert_eq!(harness.server.call_count(Endpoint::Add), 3);
    assert_eq!(harness.server.call_count(Endpoint::PullDiffPage), 0);
    assert!(summary.verified_hash_matched);
}

#[tokio::test]
async fn modes_sync_independently() {
    let harness = TestHarness::builder()
        .mode(SyncMode::File)
        .local(set(&["aa11"]))
        .remote(set(&["bb22"]))
        .build();
    harness
        .server
        .seed(TEST_USER_KEY, SyncMode::Pcm, &set(&["ff00"]));

    assert!(harness.orchestrator.run().await.is_success());

    assert_eq!(harness.local(), set(&["aa11", "bb22"]));
    assert_eq!(
        harness.server.fingerprints(TEST_USER_KEY, SyncMode::Pcm),
        set(&["ff00"])
    );
    assert!(harness.store.snapshot(SyncMode::Pcm).is_empty());
}

#[tokio::test]
async fn concurrent_run_is_refused() {
    let harness = TestHarness::new(set(&["aa11"]), set(&["bb22"]));
    harness.server.set_latency(Duration::from_millis(20));

    let (first, second) = tokio::join!(harness.orchestrator.run(), harness.orchestrator.run());

    assert!(first.is_success());
    assert_eq!(second, SyncOutcome::AlreadyRunning);
    assert!(harness.reporter.notices().contains(&Notice::SyncInProgress));
    assert_eq!(harness.server.call_count(Endpoint::ValidateUserKey), 1);
    assert!(!harness.orchestrator.is_running());

    // The flag is released once the first run ends.
    harness.server.set_latency(Duration::ZERO);
    assert!(harness.orchestrator.run().await.is_success());
}

#[tokio::test]
async fn orchestrators_sharing_a_limiter_run_one_at_a_time() {
    let harness = TestHarness::new(set(&["aa11"]), set(&["bb22"]));
    let other = harness.another_orchestrator();
    harness.server.set_latency(Duration::from_millis(20));

    let (first, second) = tokio::join!(harness.orchestrator.run(), other.run());

    assert!(first.is_success());
    assert_eq!(second, SyncOutcome::AlreadyRunning);
    assert_eq!(harness.server.call_count(Endpoint::ValidateUserKey), 1);
    assert_eq!(harness.store.save_count(), 1);
    assert!(!other.is_running());

    harness.server.set_latency(Duration::ZERO);
    assert!(other.run().await.is_success());
}

#[tokio::test]
async fn second_sync_is_a_no_op() {
    let harness = TestHarness::new(set(&["aa11"]), set(&["bb22"]));
    assert!(harness.orchestrator.run().await.is_success());
    let calls_after_first = harness.server.calls().len();

    let outcome = harness.orchestrator.run().await;
    let summary = outcome.summary().expect("sync should succeed");
    assert_eq!(summary.added_to_server_count, 0);
    assert_eq!(summary.total_client_count_after, 2);
    assert_eq!(harness.server.calls().len(), calls_after_first + 2);
}

#[tokio::test]
async fn configure_key_then_sync() {
    let harness = TestHarness::builder()
        .local(set(&["aa11"]))
        .without_user_key()
        .build();

    assert_eq!(harness.orchestrator.run().await, SyncOutcome::NotConfigured);
    assert!(harness.server.calls().is_empty());

    let canonical = harness
        .orchestrator
        .configure_user_key("  TEST-USER-0001 ")
        .await
        .expect("key should be accepted");
    assert_eq!(canonical, TEST_USER_KEY);
    assert_eq!(harness.orchestrator.user_key().as_deref(), Some(TEST_USER_KEY));

    assert!(harness.orchestrator.run().await.is_success());
    assert_eq!(harness.remote(), set(&["aa11"]));
}

#[tokio::test]
async fn rejected_key_keeps_previous_one() {
    let harness = TestHarness::new(set(&[]), set(&[]));

    let failure = harness
        .orchestrator
        .configure_user_key("nobody")
        .await
        .unwrap_err();
    assert_eq!(failure.key, tracksync_protocol::MessageKey::InvalidUserKey);
    assert_eq!(failure.phase, SyncPhase::Validating);
    assert_eq!(harness.orchestrator.user_key().as_deref(), Some(TEST_USER_KEY));
}

#[tokio::test]
async fn connectivity_check_does_not_store_key() {
    let harness = TestHarness::builder().without_user_key().build();

    harness
        .orchestrator
        .test_connectivity(TEST_USER_KEY)
        .await
        .expect("key should validate");
    assert_eq!(harness.orchestrator.user_key(), None);
    assert_eq!(harness.server.calls(), vec![Endpoint::ValidateUserKey]);
}

#[tokio::test]
async fn session_window_caps_runs() {
    let harness = TestHarness::builder()
        .local(set(&["aa11"]))
        .rate_limit(RateLimitConfig::default().with_session_window(Duration::from_secs(60), 2))
        .build();

    assert!(harness.orchestrator.run().await.is_success());
    assert!(harness.orchestrator.run().await.is_success());
    let warned = harness
        .reporter
        .notices()
        .iter()
        .any(|notice| matches!(notice, Notice::RateLimitWarning(n) if n.used == 1 && n.limit == 2));
    assert!(warned);

    let calls = harness.server.calls().len();
    let SyncOutcome::RateLimited { retry_after } = harness.orchestrator.run().await else {
        panic!("third run should be rate limited");
    };
    assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(60));
    assert_eq!(harness.server.calls().len(), calls);
    assert_eq!(harness.reporter.states().last(), Some(&RunState::Failed));

    harness.clock.advance(retry_after);
    assert!(harness.orchestrator.run().await.is_success());
}

#[tokio::test]
async fn orchestrators_share_one_limiter() {
    let harness = TestHarness::builder()
        .rate_limit(RateLimitConfig::default().with_session_window(Duration::from_secs(60), 1))
        .build();
    let other = harness.another_orchestrator();

    assert!(harness.orchestrator.run().await.is_success());
    assert!(matches!(
        other.run().await,
        SyncOutcome::RateLimited { .. }
    ));
}

#[tokio::test]
async fn channel_reporter_streams_events() {
    let harness = TestHarness::new(set(&["aa11"]), set(&[]));
    let (reporter, mut rx) = tracksync_engine::ChannelReporter::new();
    let orchestrator = harness
        .another_orchestrator()
        .with_reporter(std::sync::Arc::new(reporter));

    assert!(orchestrator.run().await.is_success());
    drop(orchestrator);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(
        events.first(),
        Some(ProgressEvent::State {
            state: RunState::Syncing
        })
    ));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::State {
            state: RunState::Success
        })
    ));
    assert!(events
        .iter()
        .any(|event| matches!(event, ProgressEvent::Summary { .. })));
}
