//! In-memory store for testing.

use crate::error::{StoreError, StoreResult};
use crate::store::LocalStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracksync_protocol::{FingerprintSet, SyncMode};

/// An in-memory fingerprint store.
///
/// Besides holding the sets, it counts saves and can be told to fail the next
/// save, which lets tests assert that a failed or cancelled sync never
/// touched local state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: RwLock<HashMap<SyncMode, FingerprintSet>>,
    save_count: AtomicUsize,
    fail_next_save: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `set` under `mode`.
    #[must_use]
    pub fn with_set(mode: SyncMode, set: FingerprintSet) -> Self {
        let store = Self::default();
        store.sets.write().insert(mode, set);
        store
    }

    /// Returns a copy of the set for `mode` without counting as a load.
    pub fn snapshot(&self, mode: SyncMode) -> FingerprintSet {
        self.sets.read().get(&mode).cloned().unwrap_or_default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    /// Makes the next save fail with [`StoreError::Unavailable`].
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn load_fingerprint_set(&self, mode: SyncMode) -> StoreResult<FingerprintSet> {
        Ok(self.snapshot(mode))
    }

    async fn save_fingerprint_set(&self, mode: SyncMode, set: &FingerprintSet) -> StoreResult<()> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected save failure".into()));
        }
        self.sets.write().insert(mode, set.clone());
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
