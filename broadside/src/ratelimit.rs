//! Per-connection message rate limiting.
//!
//! Token bucket per connection: bursts up to `burst_size` messages, refilled
//! at `messages_per_second`.
//!
//! ```rust,ignore
//! use broadside::ratelimit::{RateLimiter, RateLimitConfig};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::new(20));
//! if !limiter.check(conn) {
//!     // drop the message
//! }
//! ```

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::connection::ConnectionId;

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained messages per second
    pub messages_per_second: u32,
    /// Burst size (max tokens that can accumulate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(20)
    }
}

impl RateLimitConfig {
    pub fn new(messages_per_second: u32) -> Self {
        Self {
            messages_per_second,
            burst_size: messages_per_second,
        }
    }

    pub fn with_burst(mut self, burst_size: u32) -> Self {
        self.burst_size = burst_size;
        self
    }

    /// A zero rate disables limiting.
    pub fn is_enabled(&self) -> bool {
        self.messages_per_second > 0
    }
}

/// Token bucket state for a single connection
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(initial_tokens: f64) -> Self {
        Self {
            tokens: initial_tokens,
            last_update: Instant::now(),
        }
    }

    /// Try to consume a token, returns true if successful
    fn try_consume(&mut self, rate: f64, burst: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token bucket rate limiter keyed by connection
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<ConnectionId, TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Check if a message from a connection is allowed
    pub fn check(&self, conn: ConnectionId) -> bool {
        if !self.config.is_enabled() {
            return true;
        }
        let rate = self.config.messages_per_second as f64;
        let burst = self.config.burst_size.max(1) as f64;

        let mut bucket = self
            .buckets
            .entry(conn)
            .or_insert_with(|| TokenBucket::new(burst));

        bucket.try_consume(rate, burst)
    }

    /// Forget a closed connection
    pub fn remove(&self, conn: ConnectionId) {
        self.buckets.remove(&conn);
    }

    /// Clean up buckets not touched within `max_age`
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_update) < max_age);
    }

    /// Get number of tracked connections
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}
