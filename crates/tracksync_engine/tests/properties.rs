//! Property tests: any pair of sets converges to their union.

use proptest::prelude::*;
use tracksync_engine::RateLimitConfig;
use tracksync_testkit::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn sync_converges_to_union(
        (local, remote) in overlapping_sets_strategy(40),
        batch_size in 1usize..8,
        page_size in 1u64..6,
        mode in sync_mode_strategy(),
    ) {
        let harness = TestHarness::builder()
            .local(local.clone())
            .remote(remote.clone())
            .mode(mode)
            .batch_size(batch_size)
            .page_size(page_size)
            .rate_limit(RateLimitConfig::unlimited())
            .build();

        let outcome = runtime().block_on(harness.orchestrator.run());
        prop_assert!(outcome.is_success(), "{:?}", outcome);

        let mut union = local.clone();
        union.union_with(&remote);
        prop_assert_eq!(harness.local(), union.clone());
        prop_assert_eq!(harness.remote(), union.clone());

        let summary = outcome.summary().unwrap();
        prop_assert!(summary.verified_hash_matched);
        prop_assert_eq!(summary.added_to_server_count, local.difference(&remote).len() as u64);
        prop_assert_eq!(summary.pulled_to_client_count, remote.difference(&local).len() as u64);
        prop_assert_eq!(summary.total_client_count_after, union.len() as u64);
    }

    #[test]
    fn second_run_is_always_a_no_op(
        (local, remote) in overlapping_sets_strategy(20),
    ) {
        let harness = TestHarness::builder()
            .local(local)
            .remote(remote)
            .rate_limit(RateLimitConfig::unlimited())
            .build();
        let rt = runtime();

        prop_assert!(rt.block_on(harness.orchestrator.run()).is_success());
        let calls = harness.server.calls().len();

        let outcome = rt.block_on(harness.orchestrator.run());
        prop_assert!(outcome.is_success());
        prop_assert_eq!(harness.server.calls().len(), calls + 2);
    }
}
