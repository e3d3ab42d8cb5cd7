//! Exponential backoff around index synchronization calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{StoreError, StoreResult};

/// Delay before retry `n` (0-based) is `min(initial_delay * factor^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Total tries, the first call included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { initial_delay: Duration::from_millis(100), factor: 2.0, max_delay: Duration::from_secs(5), max_attempts: 5 }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Runs `op` until it succeeds, attempts run out, or `cancel` fires. The last error is
/// returned to the caller.
pub async fn retry_sync<T, F, Fut>(policy: &RetryPolicy, cancel: &CancellationToken, operation: &str, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut retry = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::Internal(format!("{operation}: cancelled")));
        }
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if retry + 1 >= attempts {
            return Err(err);
        }
        let delay = policy.delay_for(retry);
        warn!(target: "statesman::retry", operation, attempt = retry + 1, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        tokio::select! {
            _ = cancel.cancelled() => return Err(err),
            _ = tokio::time::sleep(delay) => {}
        }
        retry += 1;
    }
}

/// Same as `retry_sync` but the final failure is logged and swallowed.
pub async fn retry_best_effort<T, F, Fut>(policy: &RetryPolicy, cancel: &CancellationToken, operation: &str, op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    match retry_sync(policy, cancel, operation, op).await {
        Ok(value) => Some(value),
        Err(err) => {
            error!(target: "statesman::retry", operation, critical = true, error = %err, "best-effort operation failed");
            None
        }
    }
}
