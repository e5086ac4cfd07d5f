//! # Store Retry Policy
//!
//! A lost status update is recoverable but must not be dropped, so transient
//! store and queue failures are retried with capped exponential backoff
//! before they surface to the caller.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::DispatchResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation`, retrying while it fails with a transient error
    pub async fn run<T, F, Fut>(&self, name: &str, mut operation: F) -> DispatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DispatchResult<T>>,
    {
        let mut retry = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if retry > 0 {
                        debug!(operation = name, retries = retry, "Operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    warn!(
                        operation = name,
                        retry = retry + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self::new(
            config.operation_retries,
            Duration::from_millis(config.operation_base_delay_ms),
            Duration::from_millis(config.operation_max_delay_ms),
        )
    }
}
