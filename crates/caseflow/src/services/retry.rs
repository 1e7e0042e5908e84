//! Retry with exponential backoff for collaborator calls.

use std::future::Future;
use std::time::Duration;

use log::warn;

use super::error::Result;
use super::ServiceResponse;
use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// 404 and 501 are answers, not faults, and are never retried.
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(status, 408 | 429) || (status >= 500 && status != 501)
    }

    /// Runs `call` until it returns a non-transient outcome or retries run out.
    /// The last outcome is returned as is.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<ServiceResponse<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ServiceResponse<T>>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = call().await;

            let transient = match &outcome {
                Ok(response) => Self::is_retryable_status(response.status),
                Err(e) => e.is_retryable(),
            };
            if !transient || attempt >= self.max_retries {
                return outcome;
            }

            attempt += 1;
            let delay = self.delay_for(attempt);
            match &outcome {
                Ok(response) => warn!(
                    "{} returned {}, retrying (attempt {}/{}) after {:?}",
                    operation,
                    response.status,
                    attempt + 1,
                    self.max_retries + 1,
                    delay
                ),
                Err(e) => warn!(
                    "{} failed: {}, retrying (attempt {}/{}) after {:?}",
                    operation,
                    e,
                    attempt + 1,
                    self.max_retries + 1,
                    delay
                ),
            }
            tokio::time::sleep(delay).await;
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
