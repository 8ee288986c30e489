//! Retry policy for page and API requests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happened on one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Server answered with this status.
    Status(u16),
    /// Connect/read failure before a status arrived.
    Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Done,
    RetryAfter(Duration),
    GiveUp,
}

/// Exponential backoff on selected statuses and transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before retry `n` (0-based) is `backoff_factor * 2^n` seconds.
    pub backoff_factor: f64,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 1.5,
            retry_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// A single attempt with no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn is_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    pub fn backoff(&self, retry: u32) -> Duration {
        let secs = self.backoff_factor * 2f64.powi(retry.min(10) as i32);
        Duration::from_secs_f64(secs.clamp(0.0, 120.0))
    }

    /// Decide what to do after attempt number `retry` (0 = first attempt).
    ///
    /// A server-provided `Retry-After` wins over the computed backoff.
    pub fn decide(
        &self,
        retry: u32,
        outcome: AttemptOutcome,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        let retryable = match outcome {
            AttemptOutcome::Status(status) => self.is_retry_status(status),
            AttemptOutcome::Transport => true,
        };
        if !retryable {
            return RetryDecision::Done;
        }
        if retry >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(retry_after.unwrap_or_else(|| self.backoff(retry)))
    }
}

/// Parse a `Retry-After` header given in seconds, capped at one minute.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    header_value?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.min(60)))
}
