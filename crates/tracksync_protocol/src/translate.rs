//! Backend error codes and their stable client-facing categories.

use crate::messages::ApiFailure;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of error codes the backend is known to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorCode {
    /// The key is malformed or unknown.
    InvalidUserKey,
    /// The key does not exist.
    UserKeyNotFound,
    /// The key exists but is disabled.
    UserKeyInactive,
    /// The diff session expired or never existed.
    DiffSessionNotFound,
    /// The diff session belongs to another key.
    DiffSessionUserMismatch,
    /// The request body exceeded the server limit.
    RequestTooLarge,
    /// The request failed server-side validation.
    ValidationError,
    /// Generic request rate limit.
    RateLimitExceeded,
    /// Sync-specific rate limit.
    SyncRateLimitExceeded,
    /// The key's fingerprint quota would be exceeded.
    FingerprintLimitExceeded,
}

impl ApiErrorCode {
    const ALL: [ApiErrorCode; 10] = [
        ApiErrorCode::InvalidUserKey,
        ApiErrorCode::UserKeyNotFound,
        ApiErrorCode::UserKeyInactive,
        ApiErrorCode::DiffSessionNotFound,
        ApiErrorCode::DiffSessionUserMismatch,
        ApiErrorCode::RequestTooLarge,
        ApiErrorCode::ValidationError,
        ApiErrorCode::RateLimitExceeded,
        ApiErrorCode::SyncRateLimitExceeded,
        ApiErrorCode::FingerprintLimitExceeded,
    ];

    /// Wire spelling of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorCode::InvalidUserKey => "INVALID_USER_KEY",
            ApiErrorCode::UserKeyNotFound => "USER_KEY_NOT_FOUND",
            ApiErrorCode::UserKeyInactive => "USER_KEY_INACTIVE",
            ApiErrorCode::DiffSessionNotFound => "DIFF_SESSION_NOT_FOUND",
            ApiErrorCode::DiffSessionUserMismatch => "DIFF_SESSION_USER_MISMATCH",
            ApiErrorCode::RequestTooLarge => "REQUEST_TOO_LARGE",
            ApiErrorCode::ValidationError => "VALIDATION_ERROR",
            ApiErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ApiErrorCode::SyncRateLimitExceeded => "SYNC_RATE_LIMIT_EXCEEDED",
            ApiErrorCode::FingerprintLimitExceeded => "FINGERPRINT_LIMIT_EXCEEDED",
        }
    }

    /// Parses a wire code, ignoring case and surrounding whitespace.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|known| known.as_str().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable, UI-facing failure categories.
///
/// The UI localizes these keys; backend wording never reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKey {
    /// No user key is configured.
    NotConfigured,
    /// The user key is invalid or unknown.
    InvalidUserKey,
    /// The user key is disabled.
    UserKeyInactive,
    /// The diff session expired.
    DiffSessionExpired,
    /// The diff session belongs to another key.
    DiffSessionMismatch,
    /// A request was too large.
    RequestTooLarge,
    /// Too many requests or sync starts.
    RateLimited,
    /// The local set already exceeds the quota.
    QuotaExceeded,
    /// Uploading would push the server set past the quota.
    QuotaWouldExceed,
    /// The sync service could not be reached.
    NetworkUnavailable,
    /// Generic validation failure; the fallback category.
    ValidationFailed,
    /// The local store could not be read or written.
    LocalStoreFailed,
    /// Another sync is already running.
    SyncInProgress,
    /// Sync started while close to the start limit.
    RateLimitWarning,
    /// Local and remote sets already match.
    AlreadyLatest,
}

impl MessageKey {
    /// Stable string form of the key.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKey::NotConfigured => "not_configured",
            MessageKey::InvalidUserKey => "invalid_user_key",
            MessageKey::UserKeyInactive => "user_key_inactive",
            MessageKey::DiffSessionExpired => "diff_session_expired",
            MessageKey::DiffSessionMismatch => "diff_session_mismatch",
            MessageKey::RequestTooLarge => "request_too_large",
            MessageKey::RateLimited => "rate_limited",
            MessageKey::QuotaExceeded => "quota_exceeded",
            MessageKey::QuotaWouldExceed => "quota_would_exceed",
            MessageKey::NetworkUnavailable => "network_unavailable",
            MessageKey::ValidationFailed => "validation_failed",
            MessageKey::LocalStoreFailed => "local_store_failed",
            MessageKey::SyncInProgress => "sync_in_progress",
            MessageKey::RateLimitWarning => "rate_limit_warning",
            MessageKey::AlreadyLatest => "already_latest",
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps backend failures to [`MessageKey`]s.
///
/// Known codes map directly. Unknown codes fall back to keyword matching on
/// the human-readable message, then to [`MessageKey::ValidationFailed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslator;

impl ErrorTranslator {
    /// Translates a code and/or message.
    pub fn translate(code: Option<&str>, message: Option<&str>) -> MessageKey {
        if let Some(code) = code.and_then(ApiErrorCode::parse) {
            return Self::translate_code(code);
        }
        message
            .and_then(Self::match_message)
            .unwrap_or(MessageKey::ValidationFailed)
    }

    /// Translates a decoded failure envelope.
    ///
    /// When neither code nor message is recognized, the HTTP status decides.
    pub fn translate_failure(failure: &ApiFailure) -> MessageKey {
        if let Some(code) = failure.error_code() {
            return Self::translate_code(code);
        }
        failure
            .message
            .as_deref()
            .and_then(Self::match_message)
            .or_else(|| failure.status.and_then(Self::match_status))
            .unwrap_or(MessageKey::ValidationFailed)
    }

    /// Translates a known code.
    pub fn translate_code(code: ApiErrorCode) -> MessageKey {
        match code {
            ApiErrorCode::InvalidUserKey | ApiErrorCode::UserKeyNotFound => {
                MessageKey::InvalidUserKey
            }
            ApiErrorCode::UserKeyInactive => MessageKey::UserKeyInactive,
            ApiErrorCode::DiffSessionNotFound => MessageKey::DiffSessionExpired,
            ApiErrorCode::DiffSessionUserMismatch => MessageKey::DiffSessionMismatch,
            ApiErrorCode::RequestTooLarge => MessageKey::RequestTooLarge,
            ApiErrorCode::ValidationError => MessageKey::ValidationFailed,
            ApiErrorCode::RateLimitExceeded | ApiErrorCode::SyncRateLimitExceeded => {
                MessageKey::RateLimited
            }
            ApiErrorCode::FingerprintLimitExceeded => MessageKey::QuotaExceeded,
        }
    }

    fn match_status(status: u16) -> Option<MessageKey> {
        match status {
            401 | 403 => Some(MessageKey::InvalidUserKey),
            413 => Some(MessageKey::RequestTooLarge),
            429 => Some(MessageKey::RateLimited),
            502..=504 => Some(MessageKey::NetworkUnavailable),
            _ => None,
        }
    }

    fn match_message(message: &str) -> Option<MessageKey> {
        let text = message.to_lowercase();
        let has = |needle: &str| text.contains(needle);

        // Rate-limit wording also contains "limit exceeded", so it goes first.
        if has("rate limit") || has("too many requests") || has("too frequent") {
            Some(MessageKey::RateLimited)
        } else if has("quota") || has("fingerprint limit") || has("limit exceeded") {
            Some(MessageKey::QuotaExceeded)
        } else if has("session") && (has("mismatch") || has("another user")) {
            Some(MessageKey::DiffSessionMismatch)
        } else if has("session") && (has("not found") || has("expired")) {
            Some(MessageKey::DiffSessionExpired)
        } else if has("inactive") || has("disabled") {
            Some(MessageKey::UserKeyInactive)
        } else if (has("user key") || has("userkey") || has("user_key"))
            && (has("invalid") || has("not found") || has("missing") || has("unauthorized"))
        {
            Some(MessageKey::InvalidUserKey)
        } else if has("too large") || has("payload") {
            Some(MessageKey::RequestTooLarge)
        } else {
            None
        }
    }
}
