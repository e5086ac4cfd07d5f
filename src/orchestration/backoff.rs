//! # Backoff Calculator
//!
//! Delay before a failed task is redelivered:
//! `min(base_delay * multiplier^retry_count, max_delay)`, optionally jittered
//! to keep tasks that failed together from retrying together.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffCalculatorConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    /// Maximum jitter as a share of the delay (0.0 to 1.0)
    pub max_jitter: f64,
}

impl Default for BackoffCalculatorConfig {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for BackoffCalculatorConfig {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            multiplier: config.multiplier,
            jitter_enabled: config.jitter_enabled,
            max_jitter: config.jitter_max_percentage,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffCalculatorConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffCalculatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffCalculatorConfig {
        &self.config
    }

    /// Delay before the attempt following `retry_count` earlier retries
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let exponential = self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = exponential.min(self.config.max_delay_ms as f64);
        // Float to int casts saturate; the cap keeps this within u64.
        let mut delay_ms = capped as u64;

        if self.config.jitter_enabled {
            delay_ms = self.apply_jitter(delay_ms).min(self.config.max_delay_ms);
        }
        Duration::from_millis(delay_ms)
    }

    fn apply_jitter(&self, delay_ms: u64) -> u64 {
        let jitter_range = (delay_ms as f64 * self.config.max_jitter) as u64;
        if jitter_range == 0 {
            return delay_ms;
        }

        let mut rng = rand::rng();
        let jitter = rng.random_range(0..=jitter_range);
        if rng.random_bool(0.5) {
            delay_ms.saturating_add(jitter)
        } else {
            delay_ms.saturating_sub(jitter)
        }
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(BackoffCalculatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator(jitter_enabled: bool) -> BackoffCalculator {
        BackoffCalculator::new(BackoffCalculatorConfig {
            base_delay_ms: 60_000,
            max_delay_ms: 3_600_000,
            multiplier: 2.0,
            jitter_enabled,
            max_jitter: 0.1,
        })
    }

    #[test]
    fn delay_doubles_per_retry() {
        let calc = calculator(false);
        assert_eq!(calc.delay_for(0), Duration::from_secs(60));
        assert_eq!(calc.delay_for(1), Duration::from_secs(120));
        assert_eq!(calc.delay_for(2), Duration::from_secs(240));
    }

    #[test]
    fn delay_is_capped() {
        let calc = calculator(false);
        assert_eq!(calc.delay_for(10), Duration::from_secs(3_600));
        assert_eq!(calc.delay_for(u32::MAX), Duration::from_secs(3_600));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let calc = calculator(true);
        for _ in 0..100 {
            let delay = calc.delay_for(1).as_millis() as u64;
            assert!((108_000..=132_000).contains(&delay), "{delay}");
        }
    }

    #[test]
    fn defaults_follow_retry_config() {
        let config = BackoffCalculatorConfig::default();
        assert_eq!(config.base_delay_ms, 60_000);
        assert_eq!(config.multiplier, 2.0);
        assert!(!config.jitter_enabled);
    }
}
