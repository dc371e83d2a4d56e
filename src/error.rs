//! Error types for the relevance pipeline.
//!
//! # Error Handling Philosophy
//!
//! Two layers of errors exist:
//!
//! 1. [`DependencyError`] — a single call to an external dependency (the
//!    cross-encoder, a candidate source) failed. Each variant knows how it
//!    should be retried, the same way provider errors do in the rest of the
//!    `edgequake` family.
//! 2. [`StageError`] — what a pipeline stage reports upward. Most variants
//!    are *absorbed*: the stage degrades to pass-through and the run report
//!    records the degradation. Only [`StageError::Cancelled`] and
//!    [`StageError::Config`] reach the caller.
//!
//! | StageError | Produced when | Pipeline reaction |
//! |------------|---------------|-------------------|
//! | `RecoverableStageFailure` | optional enhancement failed | pass-through, log |
//! | `DependencyUnavailable` | circuit OPEN | fail fast, degraded result |
//! | `ValidationFailure` | empty query / no candidates | empty result |
//! | `ExhaustedRetries` | bounded retries all failed | same as unavailable |
//! | `Cancelled` | request token fired | propagated |
//! | `Config` | invalid configuration | propagated |

use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline stages.
pub type Result<T> = std::result::Result<T, StageError>;

// ============================================================================
// Retry Strategy
// ============================================================================

/// Strategy for retrying a failed dependency call.
///
/// Delays and the attempt budget come from the executor's
/// [`RetryConfig`](crate::retry::RetryConfig), so every dependency key is
/// bounded the same way regardless of which error it raised.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff (for transient errors).
    ExponentialBackoff,

    /// Wait for a specific duration then retry (for rate limits).
    WaitAndRetry {
        /// Duration to wait before retrying, capped by the configured max delay.
        wait: Duration,
    },

    /// Do not retry at all (permanent error, or circuit open).
    NoRetry,
}

impl RetryStrategy {
    /// Check if this strategy allows retrying.
    pub fn should_retry(&self) -> bool {
        !matches!(self, Self::NoRetry)
    }
}

// ============================================================================
// Dependency Errors
// ============================================================================

/// Errors raised by a single call into an external dependency.
#[derive(Debug, Error)]
pub enum DependencyError {
    /// Network failure talking to the dependency.
    #[error("Network error: {0}")]
    Network(String),

    /// The call timed out.
    #[error("Request timed out")]
    Timeout,

    /// The remote side rejected the call for rate reasons.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Non-success API response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response could not be interpreted.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The model could not be loaded or is not serving.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The circuit for this dependency is open; the call was never made.
    #[error("Circuit open for dependency '{dependency}'")]
    CircuitOpen { dependency: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DependencyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DependencyError::Timeout
        } else if err.is_connect() {
            DependencyError::Network(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            DependencyError::InvalidResponse(err.to_string())
        } else {
            DependencyError::Network(err.to_string())
        }
    }
}

impl DependencyError {
    /// Get the retry strategy this error calls for.
    ///
    /// # Example
    ///
    /// ```
    /// use edgequake_relevance::DependencyError;
    ///
    /// let error = DependencyError::Network("connection reset".to_string());
    /// assert!(error.retry_strategy().should_retry());
    /// ```
    pub fn retry_strategy(&self) -> RetryStrategy {
        match self {
            Self::Network(_) | Self::Timeout => RetryStrategy::ExponentialBackoff,

            Self::RateLimited(_) => RetryStrategy::WaitAndRetry {
                wait: Duration::from_secs(1),
            },

            Self::Api { status, .. } if *status >= 500 => RetryStrategy::ExponentialBackoff,
            Self::Api { status: 429, .. } => RetryStrategy::WaitAndRetry {
                wait: Duration::from_secs(1),
            },

            // An open circuit must never be retried.
            Self::CircuitOpen { .. }
            | Self::Api { .. }
            | Self::ModelUnavailable(_)
            | Self::InvalidResponse(_)
            | Self::Serialization(_) => RetryStrategy::NoRetry,
        }
    }

    /// Check if this error can be retried.
    pub fn is_recoverable(&self) -> bool {
        self.retry_strategy().should_retry()
    }
}

// ============================================================================
// Stage Errors
// ============================================================================

/// Errors reported by pipeline stages.
#[derive(Debug, Error)]
pub enum StageError {
    /// An optional enhancement failed; the stage passes its input through.
    #[error("Stage '{stage}' degraded: {reason}")]
    RecoverableStageFailure { stage: &'static str, reason: String },

    /// The dependency's circuit is open; no call was made.
    #[error("Dependency '{dependency}' unavailable")]
    DependencyUnavailable { dependency: String },

    /// Malformed query or empty candidate set.
    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    /// Bounded retries failed.
    #[error("Dependency '{dependency}' failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        dependency: String,
        attempts: u32,
        last_error: String,
    },

    /// The request-scoped cancellation token fired.
    #[error("Pipeline run cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StageError {
    /// Whether the pipeline absorbs this error by degrading the stage.
    ///
    /// `ExhaustedRetries` is treated exactly like `DependencyUnavailable`.
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            Self::RecoverableStageFailure { .. }
                | Self::DependencyUnavailable { .. }
                | Self::ExhaustedRetries { .. }
        )
    }

    /// Whether the dependency should be considered down for the rest of the run.
    pub fn is_dependency_down(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable { .. } | Self::ExhaustedRetries { .. }
        )
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("Failed to parse TOML config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl From<ConfigError> for StageError {
    fn from(err: ConfigError) -> Self {
        StageError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_error_display() {
        let error = DependencyError::Api {
            status: 503,
            message: "overloaded".to_string(),
        };
        assert_eq!(error.to_string(), "API error (503): overloaded");

        let error = DependencyError::CircuitOpen {
            dependency: "neural-inference".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Circuit open for dependency 'neural-inference'"
        );
    }

    #[test]
    fn test_network_error_is_retried() {
        let error = DependencyError::Network("reset".to_string());
        assert_eq!(error.retry_strategy(), RetryStrategy::ExponentialBackoff);
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_server_error_is_retried_client_error_is_not() {
        let server = DependencyError::Api {
            status: 502,
            message: String::new(),
        };
        assert!(server.is_recoverable());

        let client = DependencyError::Api {
            status: 400,
            message: String::new(),
        };
        assert!(!client.is_recoverable());

        let throttled = DependencyError::Api {
            status: 429,
            message: String::new(),
        };
        assert!(matches!(
            throttled.retry_strategy(),
            RetryStrategy::WaitAndRetry { .. }
        ));
    }

    #[test]
    fn test_circuit_open_never_retried() {
        let error = DependencyError::CircuitOpen {
            dependency: "provider:openalex".to_string(),
        };
        assert_eq!(error.retry_strategy(), RetryStrategy::NoRetry);
    }

    #[test]
    fn test_stage_error_classification() {
        let unavailable = StageError::DependencyUnavailable {
            dependency: "neural-inference".to_string(),
        };
        assert!(unavailable.is_degradation());
        assert!(unavailable.is_dependency_down());

        let exhausted = StageError::ExhaustedRetries {
            dependency: "neural-inference".to_string(),
            attempts: 3,
            last_error: "timeout".to_string(),
        };
        assert!(exhausted.is_degradation());
        assert!(exhausted.is_dependency_down());

        let recoverable = StageError::RecoverableStageFailure {
            stage: "neural",
            reason: "bad payload".to_string(),
        };
        assert!(recoverable.is_degradation());
        assert!(!recoverable.is_dependency_down());

        assert!(!StageError::Cancelled.is_degradation());
        assert!(!StageError::ValidationFailure("empty".to_string()).is_degradation());
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: DependencyError = json_err.into();
        assert!(matches!(err, DependencyError::Serialization(_)));
    }

    #[test]
    fn test_config_error_into_stage_error() {
        let err: StageError = ConfigError::Validation("batch_size must be > 0".to_string()).into();
        assert!(matches!(err, StageError::Config(_)));
        assert!(err.to_string().contains("batch_size"));
    }
}
