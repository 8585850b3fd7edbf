//! Error types for local store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing a local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every snapshot on disk failed to decode.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// The store refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
