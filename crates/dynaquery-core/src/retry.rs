//! Exponential-backoff retry for transient executor failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::executor::ExecutorError;

/// Backoff schedule for retrying transient failures.
///
/// The delay before retry `k` is `initial_delay * backoff_factor^k`,
/// capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Returns the delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Exponent is clamped so the multiplication cannot overflow; the
        // cap below takes over long before the clamp matters.
        let factor = self.backoff_factor.powi(attempt.min(32) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }

    /// Runs `attempt_fn` until it succeeds, retrying retryable failures.
    pub async fn run<T, F, Fut>(&self, operation: &str, attempt_fn: F) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExecutorError>>,
    {
        self.run_if(operation, ExecutorError::is_retryable, attempt_fn)
            .await
    }

    /// Runs `attempt_fn` until it succeeds, retrying failures matching
    /// `should_retry`. Non-matching failures and retry exhaustion return
    /// the last error.
    pub async fn run_if<T, P, F, Fut>(
        &self,
        operation: &str,
        should_retry: P,
        mut attempt_fn: F,
    ) -> Result<T, ExecutorError>
    where
        P: Fn(&ExecutorError) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExecutorError>>,
    {
        let mut attempt = 0;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries || !should_retry(&err) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(operation, attempt, ?delay, error = %err, "retrying transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
