//! Utility modules

pub mod db_retry;
pub mod name_tokens;
pub mod partition;
pub mod retry;

pub use db_retry::retry_on_lock;
pub use partition::{PartitionNormalizer, PartitionRules};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy, Retryable};
