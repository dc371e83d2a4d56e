//! Per-dependency circuit breaker.
//!
//! ```ascii
//!            failures >= threshold
//!   CLOSED ─────────────────────────► OPEN
//!     ▲                                │ now >= next_retry_at
//!     │ successes >= threshold         ▼ (next call)
//!     └──────────────────────────── HALF_OPEN
//!                                      │ any failure
//!                                      └────────────► OPEN (fresh timeout)
//! ```
//!
//! Circuits are keyed by dependency (`neural-inference`, `provider:<name>`)
//! and created lazily on first use. One dependency's failures never affect
//! another's circuit. Every transition happens under the registry mutex and
//! the lock is never held while the dependency itself is being called.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{ConfigError, DependencyError};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls.
    pub open_timeout_ms: u64,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// Trial calls admitted while half-open and awaiting a result.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 60_000,
            success_threshold: 2,
            half_open_max_calls: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "resilience.circuit.failure_threshold must be > 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::Validation(
                "resilience.circuit.success_threshold must be > 0".to_string(),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Validation(
                "resilience.circuit.half_open_max_calls must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    /// Half-open trials admitted that have not reported back.
    trials_pending: u32,
    next_retry_at: Option<Instant>,
}

impl Circuit {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            trials_pending: 0,
            next_retry_at: None,
        }
    }

    fn open(&mut self, now: Instant, timeout: Duration) {
        self.state = CircuitState::Open;
        self.success_count = 0;
        self.trials_pending = 0;
        self.next_retry_at = Some(now + timeout);
    }
}

/// Snapshot of one circuit, for health checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub dependency: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Time until an open circuit admits a trial call.
    pub next_retry_in: Option<Duration>,
}

/// Registry of circuits, one per dependency key.
#[derive(Debug)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask whether a call to `key` may proceed.
    ///
    /// An open circuit whose timeout has elapsed moves to half-open and
    /// admits this call as a trial.
    pub async fn try_acquire(&self, key: &str) -> Result<(), DependencyError> {
        let now = Instant::now();
        let mut circuits = self.circuits.lock().await;
        let circuit = circuits.entry(key.to_string()).or_insert_with(Circuit::closed);

        match circuit.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if circuit.next_retry_at.map_or(true, |at| now >= at) {
                    info!(dependency = key, "Circuit half-open, admitting trial call");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.success_count = 0;
                    circuit.trials_pending = 1;
                    // A trial that never reports back must not wedge the circuit.
                    circuit.next_retry_at = Some(now + self.config.open_timeout());
                    Ok(())
                } else {
                    Err(DependencyError::CircuitOpen {
                        dependency: key.to_string(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                let stale = circuit.next_retry_at.map_or(false, |at| now >= at);
                if stale {
                    circuit.trials_pending = 0;
                    circuit.next_retry_at = Some(now + self.config.open_timeout());
                }
                if circuit.trials_pending < self.config.half_open_max_calls {
                    circuit.trials_pending += 1;
                    Ok(())
                } else {
                    Err(DependencyError::CircuitOpen {
                        dependency: key.to_string(),
                    })
                }
            }
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self, key: &str) {
        let mut circuits = self.circuits.lock().await;
        let circuit = circuits.entry(key.to_string()).or_insert_with(Circuit::closed);

        match circuit.state {
            CircuitState::Closed => circuit.failure_count = 0,
            CircuitState::HalfOpen => {
                circuit.trials_pending = circuit.trials_pending.saturating_sub(1);
                circuit.success_count += 1;
                if circuit.success_count >= self.config.success_threshold {
                    info!(dependency = key, "Circuit closed after successful trials");
                    *circuit = Circuit::closed();
                }
            }
            // A call admitted before the circuit opened; the open state stands.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub async fn record_failure(&self, key: &str) {
        let now = Instant::now();
        let timeout = self.config.open_timeout();
        let mut circuits = self.circuits.lock().await;
        let circuit = circuits.entry(key.to_string()).or_insert_with(Circuit::closed);

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                if circuit.failure_count >= self.config.failure_threshold {
                    warn!(
                        dependency = key,
                        failures = circuit.failure_count,
                        timeout_ms = timeout.as_millis() as u64,
                        "Circuit opened"
                    );
                    circuit.open(now, timeout);
                }
            }
            CircuitState::HalfOpen => {
                circuit.failure_count += 1;
                warn!(dependency = key, "Trial call failed, circuit re-opened");
                circuit.open(now, timeout);
            }
            CircuitState::Open => circuit.failure_count += 1,
        }
    }

    /// Current state of `key`. Unknown keys report a fresh closed circuit.
    pub async fn status(&self, key: &str) -> CircuitStatus {
        let now = Instant::now();
        let circuits = self.circuits.lock().await;
        match circuits.get(key) {
            Some(circuit) => Self::snapshot(key, circuit, now),
            None => Self::snapshot(key, &Circuit::closed(), now),
        }
    }

    /// Status of every circuit created so far, sorted by key.
    pub async fn all_status(&self) -> Vec<CircuitStatus> {
        let now = Instant::now();
        let circuits = self.circuits.lock().await;
        let mut all: Vec<CircuitStatus> = circuits
            .iter()
            .map(|(key, circuit)| Self::snapshot(key, circuit, now))
            .collect();
        all.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        all
    }

    /// Force `key` back to closed.
    pub async fn reset(&self, key: &str) {
        let mut circuits = self.circuits.lock().await;
        if let Some(circuit) = circuits.get_mut(key) {
            *circuit = Circuit::closed();
        }
    }

    fn snapshot(key: &str, circuit: &Circuit, now: Instant) -> CircuitStatus {
        let next_retry_in = match circuit.state {
            CircuitState::Open => circuit
                .next_retry_at
                .map(|at| at.saturating_duration_since(now)),
            _ => None,
        };
        CircuitStatus {
            dependency: key.to_string(),
            state: circuit.state,
            failure_count: circuit.failure_count,
            success_count: circuit.success_count,
            next_retry_in,
        }
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
