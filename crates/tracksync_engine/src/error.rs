//! Error types for the sync engine.

use std::time::Duration;
use thiserror::Error;
use tracksync_protocol::{ApiFailure, ErrorTranslator, MessageKey, ProtocolError};
use tracksync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with `success: false`.
    #[error("server rejected request: {0}")]
    Api(ApiFailure),

    /// A response could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The local store failed.
    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No user key is configured.
    #[error("no user key configured")]
    NotConfigured,

    /// The key validated but is not active.
    #[error("user key is inactive")]
    InactiveKey,

    /// The session-start window is full.
    #[error("too many sync attempts, retry in {}ms", retry_after.as_millis())]
    RateLimited {
        /// Time until the oldest start leaves the window.
        retry_after: Duration,
    },

    /// The local set is already larger than the server quota.
    #[error("local set of {local} fingerprints exceeds limit {limit}")]
    QuotaExceeded {
        /// Local fingerprint count.
        local: u64,
        /// Server quota.
        limit: u64,
    },

    /// Uploading would push the server set past its quota.
    #[error("uploading {upload} fingerprints to {server} would exceed limit {limit}")]
    QuotaWouldExceed {
        /// Server fingerprint count at check time.
        server: u64,
        /// Unique fingerprints waiting to be uploaded.
        upload: u64,
        /// Server quota.
        limit: u64,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later attempt could succeed without user action.
    ///
    /// The orchestrator itself never retries; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::RateLimited { .. } => true,
            SyncError::Api(failure) => failure.is_session_expired(),
            _ => false,
        }
    }

    /// True when the server reported an expired diff session.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, SyncError::Api(failure) if failure.is_session_expired())
    }

    /// The stable UI category for this error.
    pub fn message_key(&self) -> MessageKey {
        match self {
            SyncError::Transport { message, retryable } => {
                if *retryable || looks_like_network_failure(message) {
                    MessageKey::NetworkUnavailable
                } else {
                    MessageKey::ValidationFailed
                }
            }
            SyncError::Api(failure) => ErrorTranslator::translate_failure(failure),
            SyncError::Protocol(_) | SyncError::Config(_) => MessageKey::ValidationFailed,
            SyncError::Store(_) => MessageKey::LocalStoreFailed,
            SyncError::NotConfigured => MessageKey::NotConfigured,
            SyncError::InactiveKey => MessageKey::UserKeyInactive,
            SyncError::RateLimited { .. } => MessageKey::RateLimited,
            SyncError::QuotaExceeded { .. } => MessageKey::QuotaExceeded,
            SyncError::QuotaWouldExceed { .. } => MessageKey::QuotaWouldExceed,
            SyncError::Cancelled => MessageKey::ValidationFailed,
        }
    }

    /// The raw backend payload, when there is one.
    pub fn raw_payload(&self) -> Option<&serde_json::Value> {
        match self {
            SyncError::Api(failure) => Some(&failure.raw),
            _ => None,
        }
    }
}

const NETWORK_HINTS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "error sending request",
    "dns",
    "failed to lookup",
    "timed out",
    "timeout",
    "unreachable",
    "fetch failed",
    "econnrefused",
    "econnreset",
    "enotfound",
    "etimedout",
    "eai_again",
];

fn looks_like_network_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    NETWORK_HINTS.iter().any(|hint| message.contains(hint))
}
