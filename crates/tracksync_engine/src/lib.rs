//! # Tracksync Engine
//!
//! Client-side synchronization of a local fingerprint set with a per-user
//! remote set.
//!
//! This crate provides:
//! - The sync orchestrator state machine
//! - A shared rate limiter (request pacer + session-start window)
//! - A progress reporting interface
//! - The remote API transport abstraction and its HTTP implementation
//!
//! ## Architecture
//!
//! A run moves through
//! `Validating → Checking → Diffing → Analyzing → Pulling → Committing →
//! Verifying → Finalizing` and ends in `Success`, `Failed` or `Cancelled`.
//! When the canonical hashes already match, `Checking` jumps straight to
//! `Finalizing`.
//!
//! ## Key Invariants
//!
//! - Fingerprints are an append-only set; union is the only merge rule
//! - Every outbound request passes through the one shared pacer
//! - Batches and pages are processed one at a time
//! - The local store is written at most once per run, after every remote add
//!   succeeded; failed or cancelled runs leave it untouched
//! - At most one diff-session recovery per run
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tracksync_engine::{HttpApi, RateLimiter, SyncConfig, SyncOrchestrator, SystemClock};
//! use tracksync_store::FileStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::new("https://sync.example.com")
//!     .with_api_secret("secret")
//!     .with_user_key("5de44d53-6236-4df6-84ab-382ac0717bc0");
//! let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), Arc::new(SystemClock::new())));
//! let api = Arc::new(HttpApi::from_config(&config)?);
//! let store = Arc::new(FileStore::new("/var/lib/tracksync"));
//!
//! let orchestrator = SyncOrchestrator::new(config, api, store, limiter);
//! let outcome = orchestrator.run().await;
//! println!("sync finished: {}", outcome.status());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod clock;
mod config;
mod error;
mod http;
mod orchestrator;
mod progress;
mod rate_limit;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RateLimitConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpApi, HttpClient, HttpResponse, ReqwestClient};
pub use orchestrator::{
    CancelHandle, SyncFailure, SyncOrchestrator, SyncOutcome, SyncPhase, SyncSummary,
};
pub use progress::{
    ChannelReporter, NoopReporter, Notice, ProgressDetails, ProgressEvent, ProgressReporter,
    RecordingReporter, RunState,
};
pub use rate_limit::{
    Admission, Pacer, RateLimitNotice, RateLimiter, SessionGuard, SessionWindow,
};
pub use transport::FingerprintApi;
