//! Vigil Test - shared test utilities for the Vigil virtual file system.
//!
//! Provides the in-memory [`MockBackend`] with scripted failures and call
//! counters, canned fixture trees, and small async helpers for
//! event-driven assertions. Sibling crates consume this as a
//! dev-dependency.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod mock;

pub use fixtures::*;
pub use mock::*;
