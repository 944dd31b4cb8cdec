//! alias-match library interface
//!
//! Resolves free-text chain names to the short aliases curated in a
//! partition-scoped registry, and learns from reviewer confirmations.
//!
//! Pipeline per partition: confirmed-mapping cache, batched proposals from an
//! external service, provenance validation against the registry. A quality
//! audit runs over every finished session.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod validators;

pub use crate::error::{MatchError, MatchResult};
