//! Sync orchestrator state machine.
//!
//! One [`SyncOrchestrator::run`] drives a complete reconciliation:
//!
//! 1. **Validating**: the user key must be valid and active.
//! 2. **Checking**: compare canonical hashes; stop early when they match or
//!    when the local set is already over quota.
//! 3. **Diffing**: batch the local set to learn what the server lacks.
//! 4. **Analyzing**: open a diff session for what the client lacks.
//! 5. **Pulling**: page through the session, recovering once from expiry.
//! 6. **Committing**: add uploads remotely, then replace the local set once.
//! 7. **Verifying**: best-effort hash check of the merged set.
//! 8. **Finalizing**: emit the summary.

use crate::clock::Clock;
use crate::config::{redact_key, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::progress::{NoopReporter, Notice, ProgressDetails, ProgressReporter, RunState};
use crate::rate_limit::{Admission, RateLimiter};
use crate::transport::FingerprintApi;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracksync_protocol::{
    AddRequest, AnalyzeDiffRequest, ApiResponse, BidirectionalDiffRequest, CheckRequest,
    CheckResponse, DiffStats, Endpoint, Fingerprint, FingerprintSet, MessageKey, ProtocolError,
    PullDiffPageRequest, SyncMode, UserKeyInfo, ValidateKeyRequest,
};
use tracksync_store::LocalStore;

/// Sent instead of an empty fingerprint list, which the backend rejects.
const EMPTY_SET_PLACEHOLDER: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Diff-session expiries tolerated per run.
const MAX_SESSION_RECOVERIES: u32 = 1;

/// Phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// No run has started.
    Idle,
    /// Validating the user key.
    Validating,
    /// Comparing collection hashes.
    Checking,
    /// Finding fingerprints the server lacks.
    Diffing,
    /// Opening a diff session.
    Analyzing,
    /// Fetching fingerprints the client lacks.
    Pulling,
    /// Uploading and persisting.
    Committing,
    /// Re-checking the merged set.
    Verifying,
    /// Emitting the summary.
    Finalizing,
    /// The run succeeded.
    Success,
    /// The run failed.
    Failed,
    /// The run was cancelled.
    Cancelled,
}

impl SyncPhase {
    /// Returns true for the absorbing end states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncPhase::Success | SyncPhase::Failed | SyncPhase::Cancelled
        )
    }

    /// Returns true while a run is between admission and a terminal state.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != SyncPhase::Idle
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Validating => "validating",
            SyncPhase::Checking => "checking",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Analyzing => "analyzing",
            SyncPhase::Pulling => "pulling",
            SyncPhase::Committing => "committing",
            SyncPhase::Verifying => "verifying",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Success => "success",
            SyncPhase::Failed => "failed",
            SyncPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag, polled between batches and pages.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Requests cancellation of the current run.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Result record of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// When the run was admitted.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub ended_at: DateTime<Utc>,
    /// Wall time of the run.
    #[serde(rename = "durationMs", with = "crate::config::millis")]
    pub duration: Duration,
    /// Local fingerprints before the run.
    pub client_initial_count: u64,
    /// Server fingerprints before the run.
    pub server_initial_count: u64,
    /// Fingerprints the server newly stored.
    pub added_to_server_count: u64,
    /// Fingerprints merged into the local set.
    pub pulled_to_client_count: u64,
    /// Local fingerprints after the run.
    pub total_client_count_after: u64,
    /// Server fingerprints after the run.
    pub total_server_count_after: u64,
    /// True when the closing hash check found both sides equal.
    pub verified_hash_matched: bool,
}

/// A terminal failure as reported to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    /// Stable category for display.
    pub key: MessageKey,
    /// Phase in which the run failed.
    pub phase: SyncPhase,
    /// Diagnostic description. Not meant for display.
    pub detail: String,
    /// Raw backend payload, when the backend answered.
    pub raw: Option<serde_json::Value>,
    /// Retry hint for rate limiting.
    pub retry_after_ms: Option<u64>,
}

impl SyncFailure {
    /// Builds the user-facing failure for an error.
    pub fn from_error(phase: SyncPhase, error: &SyncError) -> Self {
        let retry_after_ms = match error {
            SyncError::RateLimited { retry_after } => {
                Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX))
            }
            _ => None,
        };
        Self {
            key: error.message_key(),
            phase,
            detail: error.to_string(),
            raw: error.raw_payload().cloned(),
            retry_after_ms,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Both sides now hold the union.
    Success(SyncSummary),
    /// The run failed; local state is unchanged.
    Failed(SyncFailure),
    /// The run was cancelled; local state is unchanged.
    Cancelled,
    /// The session-start window is full. No request was made.
    RateLimited {
        /// Time until a start is admitted again.
        retry_after: Duration,
    },
    /// No user key is configured. No request was made.
    NotConfigured,
    /// Another run is in progress. Nothing was done.
    AlreadyRunning,
}

impl SyncOutcome {
    /// Short status string for callers that forward outcomes over IPC.
    pub fn status(&self) -> &'static str {
        match self {
            SyncOutcome::Success(_) => "success",
            SyncOutcome::Failed(_) => "failed",
            SyncOutcome::Cancelled => "cancelled",
            SyncOutcome::RateLimited { .. } => "rate_limited",
            SyncOutcome::NotConfigured => "not_configured",
            SyncOutcome::AlreadyRunning => "already_running",
        }
    }

    /// Returns true for [`SyncOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success(_))
    }

    /// The summary of a successful run.
    pub fn summary(&self) -> Option<&SyncSummary> {
        match self {
            SyncOutcome::Success(summary) => Some(summary),
            _ => None,
        }
    }

    /// The failure of a failed run.
    pub fn failure(&self) -> Option<&SyncFailure> {
        match self {
            SyncOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Per-run state. Dropped when the run ends.
struct SyncSession {
    user_key: String,
    mode: SyncMode,
    phase: SyncPhase,
    cancel: CancelHandle,
    started_at: DateTime<Utc>,
    started_ms: u64,
    diff_session_id: String,
    client_count: u64,
    server_count: u64,
    limit: u64,
    added: u64,
    client_count_after: u64,
    server_count_after: u64,
    verified: bool,
}

impl SyncSession {
    fn new(user_key: String, mode: SyncMode, cancel: CancelHandle, clock: &dyn Clock) -> Self {
        Self {
            user_key,
            mode,
            phase: SyncPhase::Idle,
            cancel,
            started_at: clock.now_utc(),
            started_ms: clock.now_ms(),
            diff_session_id: String::new(),
            client_count: 0,
            server_count: 0,
            limit: 0,
            added: 0,
            client_count_after: 0,
            server_count_after: 0,
            verified: false,
        }
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn summary(&self, clock: &dyn Clock) -> SyncSummary {
        let ended_ms = clock.now_ms();
        SyncSummary {
            started_at: self.started_at,
            ended_at: clock.now_utc(),
            duration: Duration::from_millis(ended_ms.saturating_sub(self.started_ms)),
            client_initial_count: self.client_count,
            server_initial_count: self.server_count,
            added_to_server_count: self.added,
            pulled_to_client_count: self.client_count_after.saturating_sub(self.client_count),
            total_client_count_after: self.client_count_after,
            total_server_count_after: self.server_count_after,
            verified_hash_matched: self.verified,
        }
    }
}

/// Reconciles the local fingerprint set with the user's remote set.
pub struct SyncOrchestrator<A: FingerprintApi, S: LocalStore> {
    config: SyncConfig,
    api: Arc<A>,
    store: Arc<S>,
    limiter: Arc<RateLimiter>,
    reporter: Arc<dyn ProgressReporter>,
    user_key: RwLock<Option<String>>,
    phase: RwLock<SyncPhase>,
    cancel: CancelHandle,
}

impl<A: FingerprintApi, S: LocalStore> SyncOrchestrator<A, S> {
    /// Creates an orchestrator.
    ///
    /// The limiter should be the one instance shared by everything that
    /// talks to the same backend.
    pub fn new(config: SyncConfig, api: Arc<A>, store: Arc<S>, limiter: Arc<RateLimiter>) -> Self {
        let user_key = config.normalized_user_key();
        Self {
            config,
            api,
            store,
            limiter,
            reporter: Arc::new(NoopReporter),
            user_key: RwLock::new(user_key),
            phase: RwLock::new(SyncPhase::Idle),
            cancel: CancelHandle::default(),
        }
    }

    /// Sets the progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the phase of the current or last run.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Returns true while any run sharing this orchestrator's limiter is in
    /// progress.
    pub fn is_running(&self) -> bool {
        self.limiter.is_session_active()
    }

    /// Gets the active user key.
    pub fn user_key(&self) -> Option<String> {
        self.user_key.read().clone()
    }

    /// Forgets the active user key.
    pub fn clear_user_key(&self) {
        *self.user_key.write() = None;
    }

    /// Returns a handle that can cancel the current run from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the current run at its next batch boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Checks a candidate user key against the backend without storing it.
    pub async fn test_connectivity(&self, user_key: &str) -> Result<(), SyncFailure> {
        let key = user_key.trim();
        if key.is_empty() {
            return Err(SyncFailure::from_error(
                SyncPhase::Idle,
                &SyncError::NotConfigured,
            ));
        }

        match self.validate(key).await {
            Ok(_) => {
                info!(user = %redact_key(key), "user key accepted");
                Ok(())
            }
            Err(e) => {
                warn!(user = %redact_key(key), error = %e, "user key rejected");
                Err(SyncFailure::from_error(SyncPhase::Validating, &e))
            }
        }
    }

    /// Validates a user key and makes it the active key.
    ///
    /// Returns the key as the backend spells it. On failure the previous key
    /// stays active.
    pub async fn configure_user_key(&self, user_key: &str) -> Result<String, SyncFailure> {
        let key = user_key.trim();
        if key.is_empty() {
            return Err(SyncFailure::from_error(
                SyncPhase::Idle,
                &SyncError::NotConfigured,
            ));
        }

        let info = self
            .validate(key)
            .await
            .map_err(|e| SyncFailure::from_error(SyncPhase::Validating, &e))?;
        let canonical = info
            .user_key
            .map(|echoed| echoed.trim().to_string())
            .filter(|echoed| !echoed.is_empty())
            .unwrap_or_else(|| key.to_string());

        info!(user = %redact_key(&canonical), "user key configured");
        *self.user_key.write() = Some(canonical.clone());
        Ok(canonical)
    }

    /// Runs one synchronization.
    ///
    /// Never fails: every error ends in a terminal [`SyncOutcome`] and is
    /// reported through the progress reporter.
    pub async fn run(&self) -> SyncOutcome {
        let Some(_slot) = self.limiter.try_begin_session() else {
            warn!("sync requested while another run is active");
            self.reporter.emit_notice(&Notice::SyncInProgress);
            return SyncOutcome::AlreadyRunning;
        };
        self.cancel.reset();

        match self.limiter.admit_session() {
            Admission::Rejected { retry_after } => {
                self.fail(SyncPhase::Idle, &SyncError::RateLimited { retry_after });
                return SyncOutcome::RateLimited { retry_after };
            }
            Admission::Admitted { notice } => {
                if let Some(notice) = notice {
                    info!(
                        used = notice.used,
                        limit = notice.limit,
                        "approaching sync start limit"
                    );
                    self.reporter.emit_notice(&Notice::RateLimitWarning(notice));
                }
            }
        }

        let Some(user_key) = self.user_key() else {
            self.fail(SyncPhase::Idle, &SyncError::NotConfigured);
            return SyncOutcome::NotConfigured;
        };

        let clock: &dyn Clock = &**self.limiter.clock();
        let mut session =
            SyncSession::new(user_key, self.config.mode, self.cancel.clone(), clock);
        info!(
            user = %redact_key(&session.user_key),
            mode = %session.mode,
            "sync started"
        );
        self.reporter.emit_state(RunState::Syncing);

        match self.drive(&mut session).await {
            Ok(summary) => {
                self.set_phase(SyncPhase::Success);
                info!(
                    added = summary.added_to_server_count,
                    pulled = summary.pulled_to_client_count,
                    client_total = summary.total_client_count_after,
                    server_total = summary.total_server_count_after,
                    verified = summary.verified_hash_matched,
                    duration_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
                    "sync finished"
                );
                self.reporter.emit_summary(&summary);
                self.reporter.emit_state(RunState::Success);
                SyncOutcome::Success(summary)
            }
            Err(SyncError::Cancelled) => {
                info!(phase = %session.phase, "sync cancelled");
                self.set_phase(SyncPhase::Cancelled);
                self.reporter.emit_state(RunState::Cancelled);
                SyncOutcome::Cancelled
            }
            Err(e) => SyncOutcome::Failed(self.fail(session.phase, &e)),
        }
    }

    async fn drive(&self, session: &mut SyncSession) -> SyncResult<SyncSummary> {
        let clock: &dyn Clock = &**self.limiter.clock();

        self.enter(session, SyncPhase::Validating);
        self.validate(&session.user_key).await?;

        self.enter(session, SyncPhase::Checking);
        let local = self.store.load_fingerprint_set(session.mode).await?;
        let check = self.check(session, &local).await?;
        session.client_count = local.len() as u64;
        session.server_count = check.server_count;
        session.limit = check.limit;
        self.reporter.emit_progress(
            SyncPhase::Checking,
            5,
            Some(ProgressDetails::Counts {
                client_count: session.client_count,
                server_count: session.server_count,
            }),
        );

        if session.limit > 0 && session.client_count > session.limit {
            return Err(SyncError::QuotaExceeded {
                local: session.client_count,
                limit: session.limit,
            });
        }

        if !check.need_sync {
            info!(count = session.client_count, "already up to date");
            self.reporter.emit_notice(&Notice::AlreadyLatest);
            session.client_count_after = session.client_count;
            session.server_count_after = session.server_count;
            session.verified = true;
            self.enter(session, SyncPhase::Finalizing);
            self.reporter.emit_progress(SyncPhase::Finalizing, 100, None);
            return Ok(session.summary(clock));
        }

        self.enter(session, SyncPhase::Diffing);
        let uploads = self.diff(session, &local).await?;

        self.enter(session, SyncPhase::Analyzing);
        let stats = self.analyze(session, &local).await?;
        self.reporter.emit_progress(SyncPhase::Analyzing, 40, None);

        self.enter(session, SyncPhase::Pulling);
        let merged = self.pull(session, &local, stats).await?;

        self.enter(session, SyncPhase::Committing);
        self.commit(session, &uploads, &merged).await?;

        self.enter(session, SyncPhase::Verifying);
        self.verify(session, &merged).await;

        self.enter(session, SyncPhase::Finalizing);
        self.reporter.emit_progress(SyncPhase::Finalizing, 95, None);
        let summary = session.summary(clock);
        self.reporter.emit_progress(SyncPhase::Finalizing, 100, None);
        Ok(summary)
    }

    async fn validate(&self, user_key: &str) -> SyncResult<UserKeyInfo> {
        let request = ValidateKeyRequest {
            user_key: user_key.to_string(),
        };
        let response = self
            .send(
                Endpoint::ValidateUserKey,
                self.api.validate_user_key(&request),
            )
            .await?;

        if !response.data.is_active {
            return Err(SyncError::InactiveKey);
        }
        Ok(response.data)
    }

    async fn check(
        &self,
        session: &SyncSession,
        set: &FingerprintSet,
    ) -> SyncResult<CheckResponse> {
        let request = CheckRequest {
            user_key: session.user_key.clone(),
            count: set.len() as u64,
            hash: set.collection_hash(),
            mode: session.mode,
        };
        let response = self
            .send(Endpoint::Check, self.api.check(&request))
            .await?;
        debug!(
            client_count = request.count,
            server_count = response.server_count,
            limit = response.limit,
            need_sync = response.need_sync,
            "check"
        );
        Ok(response)
    }

    /// Returns every local fingerprint the server reported missing.
    async fn diff(
        &self,
        session: &SyncSession,
        local: &FingerprintSet,
    ) -> SyncResult<FingerprintSet> {
        let batch_size = self.config.batch_size.max(1);
        let total = local.len() as u64;
        let mut processed = 0u64;
        let mut uploads = FingerprintSet::new();

        for (index, batch) in local.batches(batch_size).into_iter().enumerate() {
            session.check_cancelled()?;

            let request = BidirectionalDiffRequest {
                user_key: session.user_key.clone(),
                client_fingerprints: batch,
                batch_index: u32::try_from(index).unwrap_or(u32::MAX),
                batch_size: u32::try_from(batch_size).unwrap_or(u32::MAX),
                mode: session.mode,
            };
            let response = self
                .send(
                    Endpoint::BidirectionalDiff,
                    self.api.bidirectional_diff(&request),
                )
                .await?;

            processed += request.client_fingerprints.len() as u64;
            debug!(
                batch = index,
                size = request.client_fingerprints.len(),
                server_missing = response.server_missing_fingerprints.len(),
                "diff batch"
            );
            uploads.extend(response.server_missing_fingerprints);

            self.reporter.emit_progress(
                SyncPhase::Diffing,
                5 + scaled(processed, total, 30),
                Some(ProgressDetails::Diffing {
                    processed,
                    total,
                    to_add: uploads.len() as u64,
                }),
            );
        }

        session.check_cancelled()?;
        Ok(uploads)
    }

    /// Opens a fresh diff session and remembers its id.
    async fn analyze(
        &self,
        session: &mut SyncSession,
        local: &FingerprintSet,
    ) -> SyncResult<DiffStats> {
        let client_fingerprints = if local.is_empty() {
            vec![Fingerprint::new(EMPTY_SET_PLACEHOLDER)]
        } else {
            local.to_vec()
        };
        let request = AnalyzeDiffRequest {
            user_key: session.user_key.clone(),
            client_fingerprints,
            mode: session.mode,
        };
        let response = self
            .send(Endpoint::AnalyzeDiff, self.api.analyze_diff(&request))
            .await?;

        let stats = response.diff_stats;
        if response.diff_session_id.is_empty() && stats.client_missing_count > 0 {
            return Err(ProtocolError::InvalidEnvelope(
                "analyze-diff returned no diffSessionId".into(),
            )
            .into());
        }

        debug!(
            client_missing = stats.client_missing_count,
            page_size = stats.page_size,
            pages = stats.total_pages(),
            "diff session opened"
        );
        session.diff_session_id = response.diff_session_id;
        Ok(stats)
    }

    /// Returns the local set merged with every pulled page.
    async fn pull(
        &self,
        session: &mut SyncSession,
        local: &FingerprintSet,
        mut stats: DiffStats,
    ) -> SyncResult<FingerprintSet> {
        let mut merged = local.clone();
        let mut recoveries = 0u32;
        let mut page = 0u64;
        // Highest percent reported so far; a reopened session restarts at page 0.
        let mut reported = 45u8;

        self.reporter.emit_progress(
            SyncPhase::Pulling,
            reported,
            Some(ProgressDetails::Pulling {
                pages: 0,
                total_pages: stats.total_pages(),
            }),
        );

        while page < stats.total_pages() {
            session.check_cancelled()?;

            let request = PullDiffPageRequest {
                user_key: session.user_key.clone(),
                diff_session_id: session.diff_session_id.clone(),
                page_index: page,
                mode: session.mode,
            };
            let result = self
                .send(Endpoint::PullDiffPage, self.api.pull_diff_page(&request))
                .await;

            match result {
                Ok(response) => {
                    debug!(
                        page,
                        received = response.missing_fingerprints.len(),
                        "pulled page"
                    );
                    merged.extend(response.missing_fingerprints);
                    page += 1;

                    let total_pages = stats.total_pages();
                    reported = reported.max(45 + scaled(page, total_pages, 30));
                    self.reporter.emit_progress(
                        SyncPhase::Pulling,
                        reported,
                        Some(ProgressDetails::Pulling {
                            pages: page,
                            total_pages,
                        }),
                    );
                }
                Err(e) if e.is_session_expired() && recoveries < MAX_SESSION_RECOVERIES => {
                    recoveries += 1;
                    warn!(page, "diff session expired, opening a new one");
                    self.enter(session, SyncPhase::Analyzing);
                    // Progress stays where the expired session left it.
                    stats = self.analyze(session, local).await?;
                    self.enter(session, SyncPhase::Pulling);
                    page = 0;
                }
                Err(e) => return Err(e),
            }
        }

        session.check_cancelled()?;
        Ok(merged)
    }

    /// Adds uploads remotely, then persists the merged set.
    async fn commit(
        &self,
        session: &mut SyncSession,
        uploads: &FingerprintSet,
        merged: &FingerprintSet,
    ) -> SyncResult<()> {
        let total = uploads.len() as u64;
        if session.limit > 0 && session.server_count + total > session.limit {
            return Err(SyncError::QuotaWouldExceed {
                server: session.server_count,
                upload: total,
                limit: session.limit,
            });
        }

        if uploads.is_empty() {
            self.reporter.emit_progress(SyncPhase::Committing, 85, None);
        } else {
            self.reporter.emit_progress(
                SyncPhase::Committing,
                78,
                Some(ProgressDetails::Committing { sent: 0, total }),
            );

            let mut sent = 0u64;
            for batch in uploads.batches(self.config.batch_size.max(1)) {
                let request = AddRequest {
                    user_key: session.user_key.clone(),
                    add_fingerprints: batch,
                    mode: session.mode,
                };
                let response = self.send(Endpoint::Add, self.api.add(&request)).await?;

                sent += request.add_fingerprints.len() as u64;
                session.added += response.added_count;
                debug!(
                    sent,
                    added = response.added_count,
                    duplicates = response.duplicate_count,
                    "add batch"
                );
                self.reporter.emit_progress(
                    SyncPhase::Committing,
                    78 + scaled(sent, total, 14),
                    Some(ProgressDetails::Committing { sent, total }),
                );
            }
        }

        self.store
            .save_fingerprint_set(session.mode, merged)
            .await?;
        session.client_count_after = merged.len() as u64;
        info!(
            added = session.added,
            local_total = session.client_count_after,
            "local set committed"
        );
        Ok(())
    }

    /// Best-effort: a failure here only clears the verified flag.
    async fn verify(&self, session: &mut SyncSession, merged: &FingerprintSet) {
        self.reporter.emit_progress(SyncPhase::Verifying, 93, None);

        match self.check(session, merged).await {
            Ok(response) => {
                session.verified = !response.need_sync;
                session.server_count_after = response.server_count;
                if !session.verified {
                    warn!(
                        client_total = merged.len(),
                        server_total = response.server_count,
                        "hashes still differ after sync"
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "verification check failed");
                session.verified = false;
                session.server_count_after = session.server_count + session.added;
            }
        }
    }

    /// Paces, awaits the request and unwraps the envelope.
    ///
    /// Request futures are lazy, so nothing is sent before the pacer allows.
    async fn send<T, F>(&self, endpoint: Endpoint, request: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<ApiResponse<T>>>,
    {
        self.limiter.pace().await;
        match request.await? {
            ApiResponse::Success(payload) => Ok(payload),
            ApiResponse::Failure(failure) => {
                debug!(endpoint = endpoint.path(), error = %failure, "request rejected");
                Err(SyncError::Api(failure))
            }
        }
    }

    fn enter(&self, session: &mut SyncSession, phase: SyncPhase) {
        info!(from = %session.phase, to = %phase, "phase");
        session.phase = phase;
        self.set_phase(phase);
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    fn fail(&self, phase: SyncPhase, err: &SyncError) -> SyncFailure {
        let failure = SyncFailure::from_error(phase, err);
        error!(
            phase = %phase,
            key = %failure.key,
            error = %err,
            raw = ?failure.raw,
            "sync failed"
        );
        self.set_phase(SyncPhase::Failed);
        self.reporter.emit_error(&failure);
        self.reporter.emit_state(RunState::Failed);
        failure
    }
}

/// `done / total` of `span` percentage points, clamped.
fn scaled(done: u64, total: u64, span: u8) -> u8 {
    if total == 0 {
        return span;
    }
    let points = done.min(total) * u64::from(span) / total;
    u8::try_from(points).unwrap_or(span)
}
