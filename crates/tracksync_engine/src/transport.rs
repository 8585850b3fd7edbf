//! Transport layer abstraction for the remote fingerprint API.

use crate::error::SyncResult;
use async_trait::async_trait;
use tracksync_protocol::{
    AddRequest, AddResponse, AnalyzeDiffRequest, AnalyzeDiffResponse, ApiResponse,
    BidirectionalDiffRequest, BidirectionalDiffResponse, CheckRequest, CheckResponse,
    PullDiffPageRequest, PullDiffPageResponse, ValidateKeyRequest, ValidateKeyResponse,
};

/// The six remote operations of the fingerprint sync backend.
///
/// `Err` means the request never produced an envelope (network failure,
/// undecodable body). `Ok(ApiResponse::Failure(..))` means the backend
/// answered and refused. Implementations do not pace or retry; the
/// orchestrator owns both.
#[async_trait]
pub trait FingerprintApi: Send + Sync {
    /// Validates a user key.
    async fn validate_user_key(
        &self,
        request: &ValidateKeyRequest,
    ) -> SyncResult<ApiResponse<ValidateKeyResponse>>;

    /// Compares the client's collection hash with the server's.
    async fn check(&self, request: &CheckRequest) -> SyncResult<ApiResponse<CheckResponse>>;

    /// Reports which fingerprints of one client batch the server lacks.
    async fn bidirectional_diff(
        &self,
        request: &BidirectionalDiffRequest,
    ) -> SyncResult<ApiResponse<BidirectionalDiffResponse>>;

    /// Opens a diff session listing fingerprints only the server holds.
    async fn analyze_diff(
        &self,
        request: &AnalyzeDiffRequest,
    ) -> SyncResult<ApiResponse<AnalyzeDiffResponse>>;

    /// Fetches one page of a diff session.
    ///
    /// An expired session answers with `DIFF_SESSION_NOT_FOUND`.
    async fn pull_diff_page(
        &self,
        request: &PullDiffPageRequest,
    ) -> SyncResult<ApiResponse<PullDiffPageResponse>>;

    /// Adds fingerprints to the server set.
    ///
    /// Adding is idempotent: fingerprints the server already holds are
    /// ignored and `addedCount` counts only new ones. A run that failed part
    /// way through committing therefore needs no rollback; the next run
    /// re-diffs and sends only what is still missing.
    async fn add(&self, request: &AddRequest) -> SyncResult<ApiResponse<AddResponse>>;
}
