//! # shelfdb Testkit
//!
//! Test utilities for shelfdb.
//!
//! This crate provides:
//! - Test fixtures: backends in temporary directories, reopenable to
//!   check durability
//! - Property-based test generators using proptest
//! - A naive query oracle that evaluates a compiled query by scanning
//!   every document, for comparison with index-based evaluation
//!
//! ## Usage
//!
//! ```rust
//! use shelfdb_testkit::prelude::*;
//!
//! with_temp_backend(|db| {
//!     let actors = scenarios::seed_actors(db);
//!     assert_eq!(actors.len(), 2);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod oracle;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::oracle::*;
}

pub use fixtures::*;
pub use generators::*;
pub use oracle::*;
