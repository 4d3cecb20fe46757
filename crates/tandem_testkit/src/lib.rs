//! # Tandem Testkit
//!
//! Test utilities for Tandem replication.
//!
//! This crate provides:
//! - Replica fixtures and the two-replica `users` scenario
//! - Property-based test generators using proptest
//! - A fault-injecting record store
//! - Tracing initialization for tests
//!
//! ## Usage
//!
//! ```rust
//! use tandem_testkit::prelude::*;
//!
//! init_tracing();
//! let scenario = UsersScenario::new();
//! assert_eq!(scenario.server_ids(), vec!["alice", "peter"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
