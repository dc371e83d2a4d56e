//! Bounded retry with exponential backoff.
//!
//! The executor asks each error for its own [`RetryStrategy`]: permanent
//! errors and open circuits stop immediately, rate-limit errors wait and try
//! again, transient errors back off exponentially. The attempt budget from
//! [`RetryConfig`] bounds every path.
//!
//! # Usage
//!
//! ```ignore
//! use edgequake_relevance::retry::{RetryConfig, RetryExecutor};
//!
//! let executor = RetryExecutor::new(RetryConfig::default());
//! let scores = executor.execute(|| async { encoder.score(&pairs).await }).await;
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{DependencyError, RetryStrategy};

/// Retry bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// The operation failed for good.
#[derive(Debug)]
pub struct RetryFailure {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// The last error observed.
    pub error: DependencyError,
    /// Whether the attempt budget ran out (as opposed to a non-retryable error).
    pub exhausted: bool,
}

/// Executor for retry logic with configurable backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    log_retries: bool,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            log_retries: true,
        }
    }

    /// Create a retry executor without logging.
    pub fn silent(config: RetryConfig) -> Self {
        Self {
            config,
            log_retries: false,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, hits a non-retryable error, or the
    /// attempt budget runs out.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DependencyError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let max_delay = self.config.max_delay();
        let mut delay = self.config.base_delay();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let error = match operation().await {
                Ok(v) => {
                    if attempts > 1 && self.log_retries {
                        info!(attempts, "Operation succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) => e,
            };

            let wait = match error.retry_strategy() {
                RetryStrategy::NoRetry => {
                    if self.log_retries {
                        debug!(error = %error, "Error is non-retryable, stopping");
                    }
                    return Err(RetryFailure {
                        attempts,
                        error,
                        exhausted: false,
                    });
                }
                RetryStrategy::WaitAndRetry { wait } => wait.min(max_delay),
                RetryStrategy::ExponentialBackoff => {
                    let current = delay;
                    delay = (delay * 2).min(max_delay);
                    current
                }
            };

            if attempts >= max_attempts {
                if self.log_retries {
                    warn!(attempts, error = %error, "Operation failed, giving up");
                }
                return Err(RetryFailure {
                    attempts,
                    error,
                    exhausted: true,
                });
            }

            if self.log_retries {
                warn!(
                    attempt = attempts,
                    max_attempts,
                    delay_ms = wait.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retrying"
                );
            }
            sleep(wait).await;
        }
    }
}
