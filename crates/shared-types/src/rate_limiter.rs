//! # Rate Limiter
//!
//! Token-bucket limiter used to throttle consumer claims and presigned-URL
//! generation. Tokens refill continuously at a fixed rate; each permit
//! consumes one token; an empty bucket means the caller is saturated.

use std::sync::Mutex;
use std::time::Instant;

/// Token bucket rate limiter.
pub struct RateLimiter {
    /// Maximum burst size.
    capacity: f64,
    /// Tokens added per second.
    refill_per_sec: f64,
    /// Current fill level and last refill instant.
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `refill_per_sec` sustained permits per
    /// second with bursts up to `capacity`.
    #[must_use]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take one permit. Returns `false` when saturated.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::refill(&mut state, self.capacity, self.refill_per_sec);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current whole permits available.
    #[must_use]
    pub fn available(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::refill(&mut state, self.capacity, self.refill_per_sec);
        state.tokens as u64
    }

    /// Whether a permit would be refused right now.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.available() == 0
    }

    fn refill(state: &mut BucketState, capacity: f64, refill_per_sec: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
            state.last_refill = now;
        }
    }
}

/// Pre-configured limiters for common call sites.
pub mod presets {
    use super::RateLimiter;

    /// Worker claim throttle (20 claims/sec, burst 40).
    #[must_use]
    pub fn consumer_claims() -> RateLimiter {
        RateLimiter::new(40, 20)
    }

    /// Presigned-URL generation (50 req/sec, burst 100).
    #[must_use]
    pub fn presigned_urls() -> RateLimiter {
        RateLimiter::new(100, 50)
    }
}
