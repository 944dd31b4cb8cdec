//! Retry with exponential backoff for external calls
//!
//! One policy shared by the proposal and verification clients. Each attempt
//! runs under the caller's timeout; a timeout is just another retryable failure.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff policy for external calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Backoff multiplier per attempt
    pub multiplier: f64,
    /// Upper bound on a single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            multiplier: 2.0,
            max_backoff_ms: 8000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let ms = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis((ms as u64).min(self.max_backoff_ms))
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Final failure after the policy gave up
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub error: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

/// Run `operation` until it succeeds, returns a non-retryable error, or the
/// policy's attempts are used up
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if !error.is_retryable() || attempt >= max_attempts {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        retryable = error.is_retryable(),
                        error = %error,
                        "Call failed, giving up"
                    );
                    return Err(RetryError { attempts: attempt, error });
                }

                let delay = policy.backoff_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %error,
                    "Call failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
