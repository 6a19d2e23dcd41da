//! Deadlines and retry policy for calls to remote collaborators.
//!
//! Every network-facing call is bounded by a caller-supplied timeout and
//! fails with [`GateError::Timeout`] when the deadline passes. Retries are
//! only applied to idempotent administrative writes; checks and searches
//! surface their failures to the caller.

use std::future::Future;
use std::time::Duration;

use crate::error::{GateError, GateResult};

/// Run `fut` under `limit`, mapping an elapsed deadline to `GateError::Timeout`.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> GateResult<T>
where
    F: Future<Output = GateResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GateError::Timeout {
            operation: operation.to_string(),
            after_ms: limit.as_millis() as u64,
        }),
    }
}

/// Exponential backoff for idempotent writes: `base`, `2×base`, `4×base`, …
/// capped at `base × 2^5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(5);
        self.base_delay * (1u32 << shift)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is exhausted. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> GateResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GateResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying idempotent write"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}
