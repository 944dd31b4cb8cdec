//! # Alias Common Library
//!
//! Shared code for the alias matching workspace:
//! - Common error type
//! - Bootstrap configuration loading (TOML, root folder resolution)
//! - Database pool creation and schema bootstrap

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
