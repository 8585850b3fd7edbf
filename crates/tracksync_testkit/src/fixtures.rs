//! Test fixtures and a ready-wired sync harness.
//!
//! [`TestHarness`] connects a [`SyncOrchestrator`] to an in-memory
//! [`FingerprintServer`], a [`MemoryStore`] and a [`ManualClock`], so a whole
//! sync runs in microseconds while pacing and windows still see real
//! timestamps.

use crate::server::{FingerprintServer, ServerConfig};
use std::sync::Arc;
use tracksync_engine::{
    Clock, ManualClock, RateLimitConfig, RateLimiter, RecordingReporter, SyncConfig,
    SyncOrchestrator,
};
use tracksync_protocol::{Fingerprint, FingerprintSet, SyncMode};
use tracksync_store::MemoryStore;

/// User key the harness registers by default.
pub const TEST_USER_KEY: &str = "test-user-0001";

/// Builds a set from string literals.
pub fn set(items: &[&str]) -> FingerprintSet {
    items.iter().copied().collect()
}

/// A deterministic 64-hex fingerprint.
pub fn fingerprint(n: u64) -> Fingerprint {
    Fingerprint::new(format!("{n:064x}"))
}

/// Fingerprints for every `n` in `range`.
pub fn fingerprints(range: std::ops::Range<u64>) -> FingerprintSet {
    range.map(fingerprint).collect()
}

/// The orchestrator type the harness drives.
pub type HarnessOrchestrator = SyncOrchestrator<FingerprintServer, MemoryStore>;

/// A client, server and clock wired together.
pub struct TestHarness {
    /// The backend.
    pub server: Arc<FingerprintServer>,
    /// The local store.
    pub store: Arc<MemoryStore>,
    /// The shared clock.
    pub clock: Arc<ManualClock>,
    /// The shared limiter.
    pub limiter: Arc<RateLimiter>,
    /// Every event the orchestrator emitted.
    pub reporter: Arc<RecordingReporter>,
    /// The orchestrator under test.
    pub orchestrator: HarnessOrchestrator,
    mode: SyncMode,
    user_key: String,
}

impl TestHarness {
    /// Creates a harness with default settings.
    pub fn new(local: FingerprintSet, remote: FingerprintSet) -> Self {
        Self::builder().local(local).remote(remote).build()
    }

    /// Starts a builder.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// The local set as currently stored.
    pub fn local(&self) -> FingerprintSet {
        self.store.snapshot(self.mode)
    }

    /// The remote set as currently stored.
    pub fn remote(&self) -> FingerprintSet {
        self.server.fingerprints(&self.user_key, self.mode)
    }

    /// The registered user key.
    pub fn user_key(&self) -> &str {
        &self.user_key
    }

    /// A second orchestrator sharing this harness's server, store and limiter.
    pub fn another_orchestrator(&self) -> HarnessOrchestrator {
        SyncOrchestrator::new(
            self.orchestrator.config().clone(),
            self.server.clone(),
            self.store.clone(),
            self.limiter.clone(),
        )
    }
}

/// Configures a [`TestHarness`].
#[derive(Debug, Clone)]
pub struct HarnessBuilder {
    local: FingerprintSet,
    remote: FingerprintSet,
    mode: SyncMode,
    limit: u64,
    batch_size: usize,
    server: ServerConfig,
    rate_limit: RateLimitConfig,
    user_key: Option<String>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            local: FingerprintSet::new(),
            remote: FingerprintSet::new(),
            mode: SyncMode::Pcm,
            limit: 0,
            batch_size: 1000,
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            user_key: Some(TEST_USER_KEY.to_string()),
        }
    }
}

impl HarnessBuilder {
    /// Initial local set.
    pub fn local(mut self, set: FingerprintSet) -> Self {
        self.local = set;
        self
    }

    /// Initial remote set.
    pub fn remote(mut self, set: FingerprintSet) -> Self {
        self.remote = set;
        self
    }

    /// Derivation mode used by both sides.
    pub fn mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Server quota; zero is unlimited.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Client diff and add batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Server pull page size.
    pub fn page_size(mut self, size: u64) -> Self {
        self.server.page_size = size;
        self
    }

    /// Largest batch the server accepts.
    pub fn max_batch(mut self, size: usize) -> Self {
        self.server.max_batch = size;
        self
    }

    /// Client-side rate limits.
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Leaves the orchestrator without a user key.
    pub fn without_user_key(mut self) -> Self {
        self.user_key = None;
        self
    }

    /// Builds the harness.
    pub fn build(self) -> TestHarness {
        let server = Arc::new(FingerprintServer::with_config(self.server));
        server.add_user(TEST_USER_KEY, self.limit);
        server.seed(TEST_USER_KEY, self.mode, &self.remote);

        let store = Arc::new(MemoryStore::with_set(self.mode, self.local));
        let clock = Arc::new(ManualClock::default());
        let shared: Arc<dyn Clock> = clock.clone();
        let limiter = Arc::new(RateLimiter::new(self.rate_limit.clone(), shared));
        let reporter = Arc::new(RecordingReporter::new());

        let mut config = SyncConfig::default()
            .with_mode(self.mode)
            .with_batch_size(self.batch_size)
            .with_rate_limit(self.rate_limit);
        if let Some(key) = &self.user_key {
            config = config.with_user_key(key.clone());
        }

        let orchestrator =
            SyncOrchestrator::new(config, server.clone(), store.clone(), limiter.clone())
                .with_reporter(reporter.clone());

        TestHarness {
            server,
            store,
            clock,
            limiter,
            reporter,
            orchestrator,
            mode: self.mode,
            user_key: TEST_USER_KEY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_fingerprints_are_canonical() {
        let fp = fingerprint(255);
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().ends_with("ff"));
        assert!(Fingerprint::parse(fp.as_str()).is_ok());
        assert_eq!(fingerprints(0..10).len(), 10);
    }

    #[test]
    fn builder_seeds_both_sides() {
        let harness = TestHarness::builder()
            .local(set(&["aa11"]))
            .remote(set(&["bb22"]))
            .mode(SyncMode::File)
            .build();

        assert_eq!(harness.local(), set(&["aa11"]));
        assert_eq!(harness.remote(), set(&["bb22"]));
        assert_eq!(harness.orchestrator.config().mode, SyncMode::File);
        assert_eq!(
            harness.orchestrator.user_key().as_deref(),
            Some(TEST_USER_KEY)
        );
    }
}
