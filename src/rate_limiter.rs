//! Async-aware rate limiting for outbound dependency calls.
//!
//! Each dependency key gets its own token bucket (request rate) and
//! semaphore (calls in flight). Rate limiting is independent of circuit
//! state: it caps the call rate even while the dependency is healthy.
//!
//! ```ascii
//! call(key) ──► KeyedRateLimiter ──► limiter[key] ──► semaphore permit
//!                                                 └─► request bucket token
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::DependencyError;

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Maximum requests per minute.
    pub requests_per_minute: usize,
    /// Maximum concurrent requests.
    pub max_concurrent: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
            max_concurrent: 8,
        }
    }
}

impl RateLimiterConfig {
    pub fn new(requests_per_minute: usize) -> Self {
        Self {
            requests_per_minute,
            ..Default::default()
        }
    }

    /// Set maximum concurrent requests.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }
}

/// Token bucket refilled continuously at a fixed rate.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_to_acquire(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }

    fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}

/// Rate limiter for a single dependency.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    request_bucket: Mutex<TokenBucket>,
    concurrent_semaphore: Arc<Semaphore>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = config.requests_per_minute.max(1) as f64;
        let max_concurrent = config.max_concurrent.max(1);

        Self {
            concurrent_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            request_bucket: Mutex::new(TokenBucket::new(capacity, capacity / 60.0)),
            config,
        }
    }

    /// Acquire permission to make a request, waiting as needed.
    ///
    /// Returns a guard that releases the concurrent slot on drop.
    pub async fn acquire(&self) -> Result<RateLimitGuard, DependencyError> {
        let permit = Arc::clone(&self.concurrent_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DependencyError::RateLimited("rate limiter closed".to_string()))?;

        loop {
            let wait_time = {
                let mut bucket = self.request_bucket.lock().await;
                if bucket.try_acquire() {
                    break;
                }
                bucket.time_to_acquire()
            };

            tracing::debug!(
                wait_ms = wait_time.as_millis() as u64,
                "Rate limited: waiting for request slot"
            );
            tokio::time::sleep(wait_time).await;
        }

        Ok(RateLimitGuard { _permit: permit })
    }

    /// Try to acquire without waiting.
    ///
    /// Returns None if the call would exceed either limit.
    pub async fn try_acquire(&self) -> Option<RateLimitGuard> {
        let permit = Arc::clone(&self.concurrent_semaphore)
            .try_acquire_owned()
            .ok()?;

        let mut bucket = self.request_bucket.lock().await;
        if !bucket.try_acquire() {
            return None;
        }

        Some(RateLimitGuard { _permit: permit })
    }

    /// Current request capacity.
    pub async fn available_requests(&self) -> f64 {
        self.request_bucket.lock().await.available()
    }

    /// Free concurrent slots.
    pub fn available_slots(&self) -> usize {
        self.concurrent_semaphore.available_permits()
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

/// Guard that releases the concurrent slot on drop.
#[derive(Debug)]
pub struct RateLimitGuard {
    _permit: OwnedSemaphorePermit,
}

/// One [`RateLimiter`] per dependency key, created lazily.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    config: RateLimiterConfig,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl KeyedRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for `key`, created on first use.
    pub async fn limiter(&self, key: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().await;
        Arc::clone(
            limiters
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::new(self.config.clone()))),
        )
    }

    pub async fn acquire(&self, key: &str) -> Result<RateLimitGuard, DependencyError> {
        // The map lock is released before waiting on the bucket.
        let limiter = self.limiter(key).await;
        limiter.acquire().await
    }

    pub async fn try_acquire(&self, key: &str) -> Option<RateLimitGuard> {
        let limiter = self.limiter(key).await;
        limiter.try_acquire().await
    }

    pub async fn available_requests(&self, key: &str) -> f64 {
        self.limiter(key).await.available_requests().await
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

impl Default for KeyedRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket() {
        let mut bucket = TokenBucket::new(2.0, 1.0);

        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire()); // Bucket empty
        assert_eq!(bucket.time_to_acquire(), Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(bucket.try_acquire());
    }

    #[tokio::test]
    async fn test_rate_limiter_acquire() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(100).with_max_concurrent(5));

        let guard = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available_slots(), 4);
        drop(guard);
        assert_eq!(limiter.available_slots(), 5);

        assert!(limiter.try_acquire().await.is_some());
    }

    #[tokio::test]
    async fn test_try_acquire_respects_concurrency() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(100).with_max_concurrent(1));
        let held = limiter.try_acquire().await;
        assert!(held.is_some());
        assert!(limiter.try_acquire().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        // 60 per minute = one token per second.
        let limiter = RateLimiter::new(RateLimiterConfig::new(60));
        for _ in 0..60 {
            drop(limiter.try_acquire().await.unwrap());
        }
        assert!(limiter.try_acquire().await.is_none());

        let start = Instant::now();
        drop(limiter.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = KeyedRateLimiter::new(RateLimiterConfig::new(1));
        assert!(limiter.try_acquire("provider:a").await.is_some());
        assert!(limiter.try_acquire("provider:a").await.is_none());
        assert!(limiter.try_acquire("provider:b").await.is_some());
    }

    #[test]
    fn test_config_defaults() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.requests_per_minute, 600);
        assert_eq!(config.max_concurrent, 8);
    }
}
