//! Database pool creation and schema bootstrap

pub mod init;

pub use init::*;
