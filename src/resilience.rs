//! Resilience layer: circuit breaker, rate limiter and bounded retry.
//!
//! Every call to an external dependency (the cross-encoder, a candidate
//! source) goes through [`ResilienceLayer::call`]:
//!
//! ```ascii
//! retry loop (bounded, exponential backoff)
//!   └─► circuit.try_acquire(key)   ── OPEN ─► CircuitOpen (NoRetry, fail fast)
//!   └─► rate_limiter.acquire(key)  ── waits for a token and a slot
//!   └─► operation().await          ── no lock held here
//!   └─► circuit.record_success / record_failure
//! ```
//!
//! An open circuit is never retried because `CircuitOpen` reports
//! `RetryStrategy::NoRetry`. The layer is created once and shared behind an
//! `Arc` by every pipeline run.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitRegistry, CircuitStatus};
use crate::error::{ConfigError, DependencyError, StageError};
use crate::rate_limiter::{KeyedRateLimiter, RateLimiterConfig};
use crate::retry::{RetryConfig, RetryExecutor, RetryFailure};

/// Resilience settings shared by every dependency key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimiterConfig,
}

impl ResilienceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.circuit.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "resilience.retry.max_attempts must be > 0".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Validation(
                "resilience.retry.base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        if self.rate_limit.requests_per_minute == 0 || self.rate_limit.max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "resilience.rate_limit values must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wraps dependency calls with circuit breaking, rate limiting and retry.
#[derive(Debug)]
pub struct ResilienceLayer {
    circuits: CircuitRegistry,
    limiter: KeyedRateLimiter,
    retry: RetryExecutor,
}

impl ResilienceLayer {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            circuits: CircuitRegistry::new(config.circuit),
            limiter: KeyedRateLimiter::new(config.rate_limit),
            retry: RetryExecutor::new(config.retry),
        }
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    pub fn rate_limiter(&self) -> &KeyedRateLimiter {
        &self.limiter
    }

    /// Run `operation` against dependency `key`.
    ///
    /// `stage` names the caller in [`StageError::RecoverableStageFailure`].
    pub async fn call<F, Fut, T>(
        &self,
        stage: &'static str,
        key: &str,
        mut operation: F,
    ) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DependencyError>>,
    {
        self.retry
            .execute(|| {
                let attempt = operation();
                async move {
                    self.circuits.try_acquire(key).await?;
                    let _guard = self.limiter.acquire(key).await?;
                    match attempt.await {
                        Ok(value) => {
                            self.circuits.record_success(key).await;
                            Ok(value)
                        }
                        Err(e) => {
                            self.circuits.record_failure(key).await;
                            Err(e)
                        }
                    }
                }
            })
            .await
            .map_err(|failure| to_stage_error(stage, key, failure))
    }

    /// Diagnostic view of one dependency's circuit.
    pub async fn circuit_status(&self, key: &str) -> CircuitStatus {
        self.circuits.status(key).await
    }

    /// Diagnostic view of every circuit created so far.
    pub async fn all_circuit_status(&self) -> Vec<CircuitStatus> {
        self.circuits.all_status().await
    }
}

impl Default for ResilienceLayer {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}

fn to_stage_error(stage: &'static str, key: &str, failure: RetryFailure) -> StageError {
    match failure.error {
        DependencyError::CircuitOpen { .. } => StageError::DependencyUnavailable {
            dependency: key.to_string(),
        },
        error if failure.exhausted => StageError::ExhaustedRetries {
            dependency: key.to_string(),
            attempts: failure.attempts,
            last_error: error.to_string(),
        },
        error => StageError::RecoverableStageFailure {
            stage,
            reason: format!("{}: {}", key, error),
        },
    }
}
