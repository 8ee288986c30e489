//! Outbound request throttling.
//!
//! A single token bucket shared by every HTTP client in the process, so the
//! request rate stays bounded no matter how many workers run in parallel.

mod bucket;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub use bucket::TokenBucket;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub requests_per_minute: u32,
    pub burst_capacity: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 20,
            burst_capacity: 3,
        }
    }
}

/// Token-bucket limiter. Clones share the same bucket.
#[derive(Debug, Clone)]
pub struct Throttler {
    config: ThrottleConfig,
    bucket: Arc<Mutex<TokenBucket>>,
}

impl Throttler {
    pub fn new(config: ThrottleConfig) -> Self {
        let bucket = TokenBucket::new(&config, Instant::now());
        Self {
            config,
            bucket: Arc::new(Mutex::new(bucket)),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Wait until a token is available, then consume it.
    ///
    /// The lock is held across the sleep, so waiters are served in the
    /// order they reached the lock.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        if let Err(wait) = bucket.try_take(Instant::now()) {
            debug!("Throttling request for {:?}", wait);
            tokio::time::sleep(wait).await;
            bucket.take_after_wait(Instant::now());
        }
    }

    /// Tokens currently available, after refilling.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now());
        bucket.tokens
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}
