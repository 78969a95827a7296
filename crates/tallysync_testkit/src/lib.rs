//! # tallysync testkit
//!
//! Test utilities for tallysync.
//!
//! This crate provides:
//! - An in-memory authoritative server with failure and conflict injection
//! - Transcript-row fixtures and pre-wired test sessions
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tallysync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn audit_finds_nothing() {
//!     let fixture = TestSession::in_sync(transcript_rows("acme", 3));
//!     let report = fixture.session.perform_consistency_check().await.unwrap();
//!     assert!(report.is_consistent);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
