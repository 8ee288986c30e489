//! Token bucket state.

use std::time::Duration;

use tokio::time::Instant;

use super::ThrottleConfig;

/// Token count plus the instant it was last topped up.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Always within `[0, capacity]`.
    pub tokens: f64,
    pub capacity: f64,
    /// Tokens added per second.
    pub rate: f64,
    pub last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(config: &ThrottleConfig, now: Instant) -> Self {
        let capacity = config.burst_capacity.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            rate: config.requests_per_minute.max(1) as f64 / 60.0,
            last_refill: now,
        }
    }

    /// Add tokens for the time elapsed since the last refill.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    pub fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }

    /// Consume the token that accumulated while the caller slept.
    pub fn take_after_wait(&mut self, now: Instant) {
        self.tokens = 0.0;
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rpm: u32, burst: u32) -> ThrottleConfig {
        ThrottleConfig {
            requests_per_minute: rpm,
            burst_capacity: burst,
        }
    }

    #[test]
    fn test_burst_then_wait() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&config(60, 3), now);

        assert!(bucket.try_take(now).is_ok());
        assert!(bucket.try_take(now).is_ok());
        assert!(bucket.try_take(now).is_ok());

        let wait = bucket.try_take(now).unwrap_err();
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&config(600, 2), now);
        bucket.tokens = 0.0;

        bucket.refill(now + Duration::from_secs(3600));
        assert_eq!(bucket.tokens, 2.0);
    }

    #[test]
    fn test_partial_refill() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&config(30, 3), now);
        bucket.tokens = 0.0;

        // 30 rpm = 0.5 tokens/s
        bucket.refill(now + Duration::from_secs(1));
        assert!((bucket.tokens - 0.5).abs() < 1e-9);

        let wait = bucket.try_take(now + Duration::from_secs(1)).unwrap_err();
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-9);
    }
}
