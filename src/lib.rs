//! File preservation with verifiable manifests.
//!
//! Copies or moves files while recording where each one came from, what it
//! hashed to, and every operation that touched it, so the result can be
//! verified and restored long after the fact.

pub mod config;
pub mod core;
pub mod discover;
pub mod error;
pub mod logging;

pub use error::{PreserveError, Result};
