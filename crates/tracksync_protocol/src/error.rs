//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The body was not valid JSON or did not match the expected shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The response envelope was not a JSON object.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A fingerprint was empty or not hexadecimal.
    #[error("invalid fingerprint: {0:?}")]
    InvalidFingerprint(String),
}
