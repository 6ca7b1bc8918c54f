//! # LexiSync Testkit
//!
//! Test utilities for LexiSync.
//!
//! This crate provides:
//! - Entity builders and paged datasets
//! - Temporary paths for store snapshots and backend fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lexisync_testkit::prelude::*;
//!
//! #[test]
//! fn newer_snapshot_wins() {
//!     let old = vocab("v1", 10);
//!     let new = vocab("v1", 15);
//!     // ... merge and assert
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
