//! Engine configuration.

use std::env;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tunables for batch execution and retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Chunks a batch operation may run concurrently.
    pub max_concurrency: usize,
    /// Write requests per batch chunk (the store caps this at 25).
    pub max_batch_size: usize,
    /// Retry schedule for transient executor failures.
    pub retry: RetryPolicy,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrency: env_usize("DYNAQUERY_MAX_CONCURRENCY", defaults.max_concurrency),
            max_batch_size: env_usize("DYNAQUERY_MAX_BATCH_SIZE", defaults.max_batch_size)
                .clamp(1, 25),
            retry: RetryPolicy {
                max_retries: env_u32("DYNAQUERY_MAX_RETRIES", defaults.retry.max_retries),
                initial_delay: Duration::from_millis(env_u64(
                    "DYNAQUERY_RETRY_INITIAL_DELAY_MS",
                    100,
                )),
                max_delay: Duration::from_millis(env_u64("DYNAQUERY_RETRY_MAX_DELAY_MS", 5000)),
                backoff_factor: env_f64(
                    "DYNAQUERY_RETRY_BACKOFF_FACTOR",
                    defaults.retry.backoff_factor,
                ),
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_batch_size: 25,
            retry: RetryPolicy::default(),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
