//! Protocol messages for the fingerprint sync endpoints.
//!
//! Every endpoint takes a JSON object and answers with the uniform envelope
//! `{ "success": bool, ... }`; failures carry `error` (a machine code) and/or
//! `message` (human-readable prose). [`ApiResponse`] turns that loosely-typed
//! envelope into a tagged success/failure value.

use crate::error::{ProtocolError, ProtocolResult};
use crate::fingerprint::{Fingerprint, SyncMode};
use crate::translate::ApiErrorCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Page size assumed when the server omits `diffStats.pageSize`.
pub const DEFAULT_PAGE_SIZE: u64 = 1000;

/// Remote endpoints, relative to the API prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Validate a user key.
    ValidateUserKey,
    /// Compare collection hashes.
    Check,
    /// Report which fingerprints of a batch the server lacks.
    BidirectionalDiff,
    /// Open a diff session for server-only fingerprints.
    AnalyzeDiff,
    /// Fetch one page of a diff session.
    PullDiffPage,
    /// Add fingerprints to the server set.
    Add,
}

impl Endpoint {
    /// Path of the endpoint, starting with `/`.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::ValidateUserKey => "/validate-user-key",
            Endpoint::Check => "/check",
            Endpoint::BidirectionalDiff => "/bidirectional-diff",
            Endpoint::AnalyzeDiff => "/analyze-diff",
            Endpoint::PullDiffPage => "/pull-diff-page",
            Endpoint::Add => "/add",
        }
    }
}

/// `validate-user-key` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKeyRequest {
    /// Key to validate.
    pub user_key: String,
}

/// Key details returned by `validate-user-key`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKeyInfo {
    /// Canonical form of the key, if the server echoes it.
    #[serde(default)]
    pub user_key: Option<String>,
    /// Whether the key may be used for sync.
    #[serde(default)]
    pub is_active: bool,
}

/// `validate-user-key` success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKeyResponse {
    /// Key details.
    #[serde(default)]
    pub data: UserKeyInfo,
    /// Fingerprint quota for the key, if reported.
    #[serde(default)]
    pub limit: Option<u64>,
}

/// `check` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    /// User key.
    pub user_key: String,
    /// Number of local fingerprints.
    pub count: u64,
    /// Canonical hash of the local set.
    pub hash: String,
    /// Derivation mode.
    pub mode: SyncMode,
}

/// `check` success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    /// Fingerprints stored on the server.
    #[serde(default)]
    pub server_count: u64,
    /// Echo of the client count.
    #[serde(default)]
    pub client_count: u64,
    /// Quota for this key; zero means unlimited.
    #[serde(default)]
    pub limit: u64,
    /// True when the hashes differ.
    #[serde(default)]
    pub need_sync: bool,
}

/// `bidirectional-diff` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidirectionalDiffRequest {
    /// User key.
    pub user_key: String,
    /// One batch of the local set.
    pub client_fingerprints: Vec<Fingerprint>,
    /// Zero-based batch index.
    pub batch_index: u32,
    /// Nominal batch size.
    pub batch_size: u32,
    /// Derivation mode.
    pub mode: SyncMode,
}

/// `bidirectional-diff` success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidirectionalDiffResponse {
    /// Fingerprints of the batch that the server does not hold.
    #[serde(default)]
    pub server_missing_fingerprints: Vec<Fingerprint>,
}

/// `analyze-diff` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeDiffRequest {
    /// User key.
    pub user_key: String,
    /// The full local set.
    pub client_fingerprints: Vec<Fingerprint>,
    /// Derivation mode.
    pub mode: SyncMode,
}

/// Statistics of a diff session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    /// Number of server-only fingerprints.
    #[serde(default)]
    pub client_missing_count: u64,
    /// Entries per pull page.
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

impl Default for DiffStats {
    fn default() -> Self {
        Self {
            client_missing_count: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl DiffStats {
    /// Number of pages needed to pull every server-only fingerprint.
    pub fn total_pages(&self) -> u64 {
        self.client_missing_count.div_ceil(self.page_size.max(1))
    }
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

/// `analyze-diff` success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeDiffResponse {
    /// Server-issued, bounded-lifetime session token.
    #[serde(default)]
    pub diff_session_id: String,
    /// Session statistics.
    #[serde(default)]
    pub diff_stats: DiffStats,
}

/// `pull-diff-page` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullDiffPageRequest {
    /// User key.
    pub user_key: String,
    /// Session from `analyze-diff`.
    pub diff_session_id: String,
    /// Zero-based page index.
    pub page_index: u64,
    /// Derivation mode.
    pub mode: SyncMode,
}

/// `pull-diff-page` success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullDiffPageResponse {
    /// Server-only fingerprints on this page.
    #[serde(default)]
    pub missing_fingerprints: Vec<Fingerprint>,
}

/// `add` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRequest {
    /// User key.
    pub user_key: String,
    /// Fingerprints to add.
    pub add_fingerprints: Vec<Fingerprint>,
    /// Derivation mode.
    pub mode: SyncMode,
}

/// `add` success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResponse {
    /// Newly inserted fingerprints.
    #[serde(default, alias = "insertedCount")]
    pub added_count: u64,
    /// Fingerprints the server already held.
    #[serde(default)]
    pub duplicate_count: u64,
}

/// A failed response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiFailure {
    /// HTTP status, when the failure came over HTTP.
    pub status: Option<u16>,
    /// Machine-readable `error` field.
    pub error: Option<String>,
    /// Human-readable `message` field.
    pub message: Option<String>,
    /// The full response body, for diagnostics only.
    pub raw: Value,
}

impl ApiFailure {
    /// Creates a failure with an error code and message.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        let error = error.into();
        let message = message.into();
        let raw = serde_json::json!({
            "success": false,
            "error": error,
            "message": message,
        });
        Self {
            status: None,
            error: Some(error),
            message: Some(message),
            raw,
        }
    }

    /// Attaches an HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Builds a failure from a non-2xx HTTP response whose body is not an
    /// envelope (proxy error pages, empty bodies).
    pub fn from_http(status: u16, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body).trim().to_string();
        let message = if text.is_empty() {
            format!("HTTP {status}")
        } else {
            text.chars().take(512).collect()
        };
        Self {
            status: Some(status),
            error: None,
            message: Some(message),
            raw: Value::String(text),
        }
    }

    /// The recognized error code, if any.
    pub fn error_code(&self) -> Option<ApiErrorCode> {
        self.error.as_deref().and_then(ApiErrorCode::parse)
    }

    /// True when the server reports that the diff session no longer exists.
    pub fn is_session_expired(&self) -> bool {
        self.error_code() == Some(ApiErrorCode::DiffSessionNotFound)
    }

    fn from_value(raw: Value, status: Option<u16>) -> Self {
        let text = |name: &str| {
            raw.get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            status,
            error: text("error"),
            message: text("message"),
            raw,
        }
    }
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.error, &self.message) {
            (Some(code), Some(message)) => write!(f, "{code}: {message}"),
            (Some(code), None) => f.write_str(code),
            (None, Some(message)) => f.write_str(message),
            (None, None) => f.write_str("request failed"),
        }
    }
}

/// A decoded response envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse<T> {
    /// `success: true` with the endpoint payload.
    Success(T),
    /// `success: false` (or missing).
    Failure(ApiFailure),
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Decodes a JSON body.
    ///
    /// A body whose `success` field is not literally `true` is a failure.
    pub fn decode(body: &[u8], status: Option<u16>) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value, status)
    }

    /// Decodes an already-parsed JSON value.
    pub fn from_value(value: Value, status: Option<u16>) -> ProtocolResult<Self> {
        if !value.is_object() {
            return Err(ProtocolError::InvalidEnvelope(format!(
                "expected object, got {value}"
            )));
        }

        if value.get("success").and_then(Value::as_bool) == Some(true) {
            Ok(ApiResponse::Success(serde_json::from_value(value)?))
        } else {
            Ok(ApiResponse::Failure(ApiFailure::from_value(value, status)))
        }
    }
}

impl<T> ApiResponse<T> {
    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<T, ApiFailure> {
        match self {
            ApiResponse::Success(payload) => Ok(payload),
            ApiResponse::Failure(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn check_request_wire_shape() {
        let request = CheckRequest {
            user_key: "k".into(),
            count: 2,
            hash: "abc".into(),
            mode: SyncMode::Pcm,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"userKey": "k", "count": 2, "hash": "abc", "mode": "pcm"})
        );
    }

    #[test]
    fn diff_request_wire_shape() {
        let request = BidirectionalDiffRequest {
            user_key: "k".into(),
            client_fingerprints: vec![Fingerprint::new("AA11")],
            batch_index: 3,
            batch_size: 1000,
            mode: SyncMode::File,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "userKey": "k",
                "clientFingerprints": ["aa11"],
                "batchIndex": 3,
                "batchSize": 1000,
                "mode": "file"
            })
        );
    }

    #[test]
    fn decode_check_success() {
        let body = br#"{"success":true,"serverCount":4,"clientCount":2,"limit":100,"needSync":true}"#;
        let response = ApiResponse::<CheckResponse>::decode(body, Some(200)).unwrap();
        assert_eq!(
            response,
            ApiResponse::Success(CheckResponse {
                server_count: 4,
                client_count: 2,
                limit: 100,
                need_sync: true,
            })
        );
    }

    #[test]
    fn decode_failure_keeps_raw_payload() {
        let body = br#"{"success":false,"error":"DIFF_SESSION_NOT_FOUND","message":"gone"}"#;
        let failure = ApiResponse::<PullDiffPageResponse>::decode(body, Some(404))
            .unwrap()
            .into_result()
            .unwrap_err();

        assert!(failure.is_session_expired());
        assert_eq!(failure.status, Some(404));
        assert_eq!(failure.message.as_deref(), Some("gone"));
        assert_eq!(failure.raw["error"], "DIFF_SESSION_NOT_FOUND");
    }

    #[test]
    fn missing_success_flag_is_failure() {
        let response = ApiResponse::<CheckResponse>::from_value(json!({"needSync": false}), None)
            .unwrap();
        assert!(matches!(response, ApiResponse::Failure(_)));
    }

    #[test]
    fn non_object_body_is_rejected() {
        let result = ApiResponse::<CheckResponse>::decode(b"[1,2]", None);
        assert!(matches!(result, Err(ProtocolError::InvalidEnvelope(_))));
    }

    #[test]
    fn add_response_accepts_inserted_count() {
        let response = ApiResponse::<AddResponse>::from_value(
            json!({"success": true, "insertedCount": 7, "duplicateCount": 1}),
            None,
        )
        .unwrap()
        .into_result()
        .unwrap();
        assert_eq!(response.added_count, 7);
        assert_eq!(response.duplicate_count, 1);
    }

    #[test]
    fn analyze_defaults_page_size() {
        let response = ApiResponse::<AnalyzeDiffResponse>::from_value(
            json!({"success": true, "diffSessionId": "s1", "diffStats": {"clientMissingCount": 2500}}),
            None,
        )
        .unwrap()
        .into_result()
        .unwrap();
        assert_eq!(response.diff_stats.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(response.diff_stats.total_pages(), 3);
    }

    #[test]
    fn total_pages_rounds_up() {
        let stats = |count, size| DiffStats {
            client_missing_count: count,
            page_size: size,
        };
        assert_eq!(stats(0, 1000).total_pages(), 0);
        assert_eq!(stats(1, 1000).total_pages(), 1);
        assert_eq!(stats(1000, 1000).total_pages(), 1);
        assert_eq!(stats(1001, 1000).total_pages(), 2);
        assert_eq!(stats(5, 0).total_pages(), 5);
    }

    #[test]
    fn from_http_keeps_status_and_text() {
        let failure = ApiFailure::from_http(502, b"<html>Bad Gateway</html>");
        assert_eq!(failure.status, Some(502));
        assert_eq!(failure.error, None);
        assert_eq!(failure.message.as_deref(), Some("<html>Bad Gateway</html>"));

        let empty = ApiFailure::from_http(429, b"");
        assert_eq!(empty.message.as_deref(), Some("HTTP 429"));
    }

    #[test]
    fn failure_display() {
        assert_eq!(
            ApiFailure::new("VALIDATION_ERROR", "bad hash").to_string(),
            "VALIDATION_ERROR: bad hash"
        );
    }
}
