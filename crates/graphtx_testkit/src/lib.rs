//! # graphtx Testkit
//!
//! Test utilities for graphtx.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Reusable transaction event handler doubles
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use graphtx_testkit::prelude::*;
//!
//! #[test]
//! fn handler_sees_commit() {
//!     with_test_db(|db| {
//!         let handler = db.register_handler(RecordingHandler::shared("h", 1)).unwrap();
//!         db.transaction(|tx| tx.create_node().map(|_| ())).unwrap();
//!         assert_eq!(handler.count(Callback::AfterCommit), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod handlers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::handlers::*;
}

pub use fixtures::*;
pub use generators::*;
pub use handlers::*;
