//! # Tracksync Testkit
//!
//! Test utilities for Tracksync.
//!
//! This crate provides:
//! - [`FingerprintServer`], an in-memory reference backend with failure
//!   injection and call accounting
//! - [`LoopbackClient`], an HTTP client that routes JSON straight into a
//!   `FingerprintServer`
//! - Fixtures and a ready-wired [`TestHarness`]
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use tracksync_testkit::prelude::*;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let harness = TestHarness::new(set(&["aa11", "bb22"]), set(&["bb22", "cc33"]));
//! let outcome = harness.orchestrator.run().await;
//!
//! assert!(outcome.is_success());
//! assert_eq!(harness.local(), set(&["aa11", "bb22", "cc33"]));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod loopback;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::loopback::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use loopback::*;
pub use server::*;
