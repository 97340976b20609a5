//! # mobisync Testkit
//!
//! Test utilities for mobisync.
//!
//! This crate provides:
//! - An engine wired to in-memory collaborators
//! - Scripted and selective transports
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mobisync_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_with_engine() {
//!     let t = TestEngine::new(test_config(3));
//!     let d1 = t.device("d1", "u1", true).await;
//!     let op = t.sync_to_end(upload(&d1, "project", "p1", 1024)).await.unwrap();
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
