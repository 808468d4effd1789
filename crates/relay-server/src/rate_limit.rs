//! Per-session token bucket.
//!
//! Tokens refill continuously at `per_sec` up to `burst`. Refill is computed
//! lazily on each access, so idle sessions cost nothing. The bucket has no
//! lock of its own; it lives inside the session registry entry.

use relay_settings::SessionLimits;
use tokio::time::Instant;

/// Bucket parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimit {
    /// Capacity, and the initial token count.
    pub burst: f64,
    /// Refill rate in tokens per second.
    pub per_sec: f64,
}

impl RateLimit {
    /// Rate limit configured in the session limits.
    pub fn from_limits(limits: &SessionLimits) -> Self {
        Self {
            burst: limits.rate_limit_burst,
            per_sec: limits.rate_limit_per_sec,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::from_limits(&SessionLimits::default())
    }
}

/// Token bucket state for one session.
#[derive(Clone, Debug)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket holding `limit.burst` tokens as of `now`.
    pub fn full(limit: RateLimit, now: Instant) -> Self {
        Self {
            tokens: limit.burst,
            last_refill: now,
        }
    }

    /// Refill for the time elapsed since the last access, then take one token.
    pub fn try_consume(&mut self, limit: RateLimit, now: Instant) -> bool {
        self.refill(limit, now);
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }

    /// Tokens available as of `now`.
    pub fn available(&mut self, limit: RateLimit, now: Instant) -> f64 {
        self.refill(limit, now);
        self.tokens
    }

    fn refill(&mut self, limit: RateLimit, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * limit.per_sec).min(limit.burst);
        self.last_refill = now;
    }
}
