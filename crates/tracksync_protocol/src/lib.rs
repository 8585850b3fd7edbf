//! # Tracksync Protocol
//!
//! Fingerprint set types, canonical hashing and wire messages for the
//! Tracksync fingerprint synchronization protocol.
//!
//! This crate provides:
//! - [`Fingerprint`], [`FingerprintSet`] and [`SyncMode`]
//! - The canonical collection hash ([`collection_hash`])
//! - JSON request/response messages for the six remote endpoints
//! - The [`ApiResponse`] success/failure envelope
//! - [`ErrorTranslator`] mapping backend codes to stable [`MessageKey`]s
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Canonical hash
//!
//! Both client and server hash a set the same way: lowercase every
//! fingerprint, sort ascending, concatenate with no separator, SHA-256,
//! lowercase hex. The empty set hashes to `SHA-256("")`.
//!
//! ```rust
//! use tracksync_protocol::{collection_hash, FingerprintSet};
//!
//! let set: FingerprintSet = ["BB22", "aa11"].into_iter().collect();
//! assert_eq!(set.collection_hash(), collection_hash(["aa11", "bb22"]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod fingerprint;
mod hash;
mod messages;
mod translate;

pub use error::{ProtocolError, ProtocolResult};
pub use fingerprint::{Fingerprint, FingerprintSet, SyncMode};
pub use hash::{collection_hash, EMPTY_COLLECTION_HASH};
pub use messages::{
    AddRequest, AddResponse, AnalyzeDiffRequest, AnalyzeDiffResponse, ApiFailure, ApiResponse,
    BidirectionalDiffRequest, BidirectionalDiffResponse, CheckRequest, CheckResponse, DiffStats,
    Endpoint, PullDiffPageRequest, PullDiffPageResponse, UserKeyInfo, ValidateKeyRequest,
    ValidateKeyResponse, DEFAULT_PAGE_SIZE,
};
pub use translate::{ApiErrorCode, ErrorTranslator, MessageKey};
