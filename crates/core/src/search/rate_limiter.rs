//! Token bucket rate limiter for per-provider rate limiting.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::provider::{ProviderError, RateLimitPolicy};

/// Rate limit status for a provider.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RateLimitStatus {
    pub requests: u32,
    pub window_secs: u64,
    pub tokens_available: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_available_in_ms: Option<u64>,
}

/// Token bucket rate limiter for a single provider.
///
/// Uses the token bucket algorithm where tokens are added at a constant rate
/// and consumed when requests are made. If no tokens are available, the request
/// must wait.
pub struct TokenBucket {
    policy: RateLimitPolicy,
    /// Max tokens (= requests per window).
    capacity: f64,
    /// Current available tokens.
    tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    /// Last refill time.
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a new token bucket for the given policy.
    ///
    /// The bucket starts full, allowing immediate requests up to the capacity.
    pub fn new(policy: RateLimitPolicy) -> Self {
        let capacity = policy.requests.max(1) as f64;
        Self {
            policy,
            capacity,
            tokens: capacity, // Start full
            refill_rate: capacity / policy.window().as_secs_f64(),
            last_refill: Instant::now(),
        }
    }

    /// Try to acquire a token.
    ///
    /// Returns `Ok(())` if a token was acquired successfully.
    /// Returns `Err(wait_duration)` if rate limited, with the duration to wait.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(self.wait_for_token())
        }
    }

    /// Update the policy.
    ///
    /// The current token count is preserved (clamped to new capacity).
    pub fn set_policy(&mut self, policy: RateLimitPolicy) {
        self.refill();
        self.policy = policy;
        self.capacity = policy.requests.max(1) as f64;
        self.refill_rate = self.capacity / policy.window().as_secs_f64();
        self.tokens = self.tokens.min(self.capacity);
    }

    /// Get the current rate limit status.
    pub fn status(&mut self) -> RateLimitStatus {
        self.refill();
        RateLimitStatus {
            requests: self.policy.requests,
            window_secs: self.policy.window_secs,
            tokens_available: self.tokens,
            next_available_in_ms: if self.tokens >= 1.0 {
                None
            } else {
                Some(self.wait_for_token().as_millis() as u64)
            },
        }
    }

    fn wait_for_token(&self) -> Duration {
        let tokens_needed = 1.0 - self.tokens;
        Duration::from_secs_f64(tokens_needed / self.refill_rate)
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Pool of rate limiters, one per provider.
///
/// Thread-safe and async-compatible.
#[derive(Default)]
pub struct RateLimiterPool {
    limiters: RwLock<HashMap<String, TokenBucket>>,
}

impl RateLimiterPool {
    /// Create an empty rate limiter pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a provider in the pool.
    pub async fn configure(&self, provider: &str, policy: RateLimitPolicy) {
        let mut limiters = self.limiters.write().await;
        if let Some(bucket) = limiters.get_mut(provider) {
            if bucket.policy != policy {
                bucket.set_policy(policy);
            }
        } else {
            limiters.insert(provider.to_string(), TokenBucket::new(policy));
        }
    }

    /// Remove a provider from the pool.
    pub async fn remove(&self, provider: &str) -> bool {
        let mut limiters = self.limiters.write().await;
        limiters.remove(provider).is_some()
    }

    /// Try to take a token without waiting.
    ///
    /// Unknown providers get a bucket with the default policy.
    pub async fn try_acquire(&self, provider: &str) -> Result<(), Duration> {
        let mut limiters = self.limiters.write().await;
        let bucket = limiters.entry(provider.to_string()).or_insert_with(|| {
            warn!(provider = %provider, "No rate limit configured, using default policy");
            TokenBucket::new(RateLimitPolicy::default())
        });
        bucket.try_acquire()
    }

    /// Take a token, waiting at most `max_wait` for one to become available.
    ///
    /// Returns `ProviderError::RateLimited` when the next token is further
    /// away than the remaining wait budget, so the caller can skip the
    /// provider instead of stalling.
    pub async fn acquire(&self, provider: &str, max_wait: Duration) -> Result<(), ProviderError> {
        let give_up_at = Instant::now() + max_wait;
        loop {
            match self.try_acquire(provider).await {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    let remaining = give_up_at.saturating_duration_since(Instant::now());
                    if wait > remaining {
                        debug!(
                            provider = %provider,
                            wait_ms = wait.as_millis() as u64,
                            "Rate limit would exceed wait budget"
                        );
                        return Err(ProviderError::RateLimited {
                            retry_after_ms: wait.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Get rate limit status for a specific provider.
    pub async fn get_status(&self, provider: &str) -> Option<RateLimitStatus> {
        let mut limiters = self.limiters.write().await;
        limiters.get_mut(provider).map(|bucket| bucket.status())
    }

    /// Check if a provider exists in the pool.
    pub async fn has_provider(&self, provider: &str) -> bool {
        let limiters = self.limiters.read().await;
        limiters.contains_key(provider)
    }
}
