//! Local store trait definition.

use crate::error::StoreResult;
use async_trait::async_trait;
use tracksync_protocol::{FingerprintSet, SyncMode};

/// The local, persistent fingerprint set.
///
/// # Invariants
///
/// - `load_fingerprint_set` returns canonical (lowercase, deduplicated)
///   fingerprints
/// - `save_fingerprint_set` replaces the whole set for the mode atomically:
///   a concurrent or subsequent load observes either the old set or the new
///   set, never a mix or a truncated file
/// - Stores must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Loads the set for `mode`. A mode with no data yields the empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored data cannot be read or decoded.
    async fn load_fingerprint_set(&self, mode: SyncMode) -> StoreResult<FingerprintSet>;

    /// Atomically replaces the set for `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the previous set stays in place.
    async fn save_fingerprint_set(&self, mode: SyncMode, set: &FingerprintSet) -> StoreResult<()>;
}
