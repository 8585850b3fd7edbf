//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracksync_protocol::{Endpoint, SyncMode};

/// Default remote API prefix.
pub const DEFAULT_API_PREFIX: &str = "/frkbapi/v1/fingerprint-sync";

/// Configuration for sync operations.
///
/// Durations are written in milliseconds when (de)serialized.
///
/// ```
/// use tracksync_engine::SyncConfig;
///
/// let config = SyncConfig::from_json(r#"{
///     "baseUrl": "https://sync.example.com",
///     "userKey": "  5de44d53  ",
///     "mode": "file",
///     "rateLimit": { "minIntervalMs": 100 }
/// }"#).unwrap();
///
/// assert_eq!(config.normalized_user_key().as_deref(), Some("5de44d53"));
/// assert_eq!(config.rate_limit.max_sessions_per_window, 10);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Server URL, without the API prefix.
    pub base_url: String,
    /// Path prefix of the sync endpoints.
    pub api_prefix: String,
    /// Bearer token sent with every request.
    pub api_secret: String,
    /// The user key whose set is synchronized.
    pub user_key: Option<String>,
    /// Fingerprint derivation mode.
    pub mode: SyncMode,
    /// Items per diff and add batch.
    pub batch_size: usize,
    /// Per-request timeout, applied by the HTTP client.
    #[serde(rename = "requestTimeoutMs", with = "millis")]
    pub request_timeout: Duration,
    /// Request pacing and session-start limits.
    pub rate_limit: RateLimitConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            api_secret: String::new(),
            user_key: None,
            mode: SyncMode::Pcm,
            batch_size: 1000,
            request_timeout: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
        }
    }

    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Sets the API prefix.
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    /// Sets the bearer token.
    pub fn with_api_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = secret.into();
        self
    }

    /// Sets the user key.
    pub fn with_user_key(mut self, user_key: impl Into<String>) -> Self {
        self.user_key = Some(user_key.into());
        self
    }

    /// Sets the derivation mode.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the diff/add batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the rate limit configuration.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// The trimmed user key, or `None` when missing or blank.
    pub fn normalized_user_key(&self) -> Option<String> {
        self.user_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }

    /// Full URL of an endpoint.
    pub fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!(
            "{}/{}{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_matches('/'),
            endpoint.path()
        )
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://localhost:3001")
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("base_url", &self.base_url)
            .field("api_prefix", &self.api_prefix)
            .field("api_secret", &"<redacted>")
            .field("user_key", &self.user_key.as_deref().map(redact_key))
            .field("mode", &self.mode)
            .field("batch_size", &self.batch_size)
            .field("request_timeout", &self.request_timeout)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

/// Request pacing and session-start limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Minimum spacing between any two outbound requests.
    #[serde(rename = "minIntervalMs", with = "millis")]
    pub min_interval: Duration,
    /// Length of the sliding session-start window.
    #[serde(rename = "sessionWindowMs", with = "millis")]
    pub session_window: Duration,
    /// Session starts admitted per window.
    pub max_sessions_per_window: usize,
}

impl RateLimitConfig {
    /// No pacing and no start limit. Intended for tests.
    pub fn unlimited() -> Self {
        Self {
            min_interval: Duration::ZERO,
            session_window: Duration::ZERO,
            max_sessions_per_window: usize::MAX,
        }
    }

    /// Sets the minimum request spacing.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Sets the session window length and cap.
    pub fn with_session_window(mut self, window: Duration, max_sessions: usize) -> Self {
        self.session_window = window;
        self.max_sessions_per_window = max_sessions;
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(650),
            session_window: Duration::from_secs(5 * 60),
            max_sessions_per_window: 10,
        }
    }
}

/// Shortens a user key for logs.
pub(crate) fn redact_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{prefix}***")
}

/// Serde helpers storing a `Duration` as whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
