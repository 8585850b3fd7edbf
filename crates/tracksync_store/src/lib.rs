//! # Tracksync Store
//!
//! Local fingerprint set stores for Tracksync.
//!
//! A store holds one [`FingerprintSet`](tracksync_protocol::FingerprintSet)
//! per [`SyncMode`](tracksync_protocol::SyncMode). The sync engine reads it
//! once at the start of a run and replaces it at most once, atomically, after
//! the remote commit succeeds.
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral use
//! - [`FileStore`] - Versioned JSON snapshots with an atomic pointer file
//!
//! ## Example
//!
//! ```rust
//! use tracksync_store::{LocalStore, MemoryStore};
//! use tracksync_protocol::{FingerprintSet, SyncMode};
//!
//! # tokio_test_block_on(async {
//! let store = MemoryStore::new();
//! let set: FingerprintSet = ["aa11", "bb22"].into_iter().collect();
//! store.save_fingerprint_set(SyncMode::Pcm, &set).await.unwrap();
//! assert_eq!(store.load_fingerprint_set(SyncMode::Pcm).await.unwrap(), set);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::{FileStore, DEFAULT_KEEP_VERSIONS};
pub use memory::MemoryStore;
pub use store::LocalStore;
