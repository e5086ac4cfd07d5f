//! # Dispatch Configuration
//!
//! Configuration for planning, retries, workers, the work queue and the state
//! store. Every component receives the section it needs explicitly at
//! construction; nothing is read from ambient global state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use partition_dispatch::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let flush_threshold = manager.config().worker.flush_threshold;
//! let backoff_cap = manager.config().retry.max_delay();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Partition planning bounds
    pub planner: PlannerConfig,

    /// Retry supervisor backoff policy
    pub retry: RetryConfig,

    /// Per-worker execution settings
    pub worker: WorkerConfig,

    /// Work queue settings
    pub queue: QueueConfig,

    /// State store connection and transient-failure handling
    pub store: StoreConfig,

    /// Session housekeeping
    pub session: SessionConfig,

    /// Log output
    pub logging: LoggingConfig,
}

impl DispatchConfig {
    /// Validate cross-field constraints that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        self.planner.validate()?;
        self.retry.validate()?;
        self.worker.validate()?;
        self.store.validate()?;

        if self.queue.queue_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "queue_name",
                "queue",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Smallest accepted `target_partition_size`
    pub min_partition_size: u64,
    /// Largest accepted `target_partition_size`
    pub max_partition_size: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_partition_size: 1,
            max_partition_size: 1_000_000,
        }
    }
}

impl PlannerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.min_partition_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "planner.min_partition_size",
                self.min_partition_size,
                "must be at least 1",
            ));
        }
        if self.max_partition_size < self.min_partition_size {
            return Err(ConfigurationError::invalid_value(
                "planner.max_partition_size",
                self.max_partition_size,
                "must not be smaller than min_partition_size",
            ));
        }
        Ok(())
    }

    pub fn accepts(&self, target_partition_size: u64) -> bool {
        (self.min_partition_size..=self.max_partition_size).contains(&target_partition_size)
    }
}

/// Backoff and retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Automatic retries after the first failed attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Cap applied after exponential growth
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    /// Fraction of the computed delay used as the jitter range (0.0 to 1.0)
    pub jitter_max_percentage: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay_ms: defaults::BASE_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
            multiplier: defaults::BACKOFF_MULTIPLIER,
            jitter_enabled: false,
            jitter_max_percentage: 0.1,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                self.multiplier,
                "must be at least 1.0",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_delay_ms",
                self.max_delay_ms,
                "must not be smaller than base_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_max_percentage) {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_max_percentage",
                self.jitter_max_percentage,
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Worker execution configuration, passed to each worker at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Stable identifier recorded on claimed tasks; generated when absent
    pub worker_id: Option<String>,
    /// Unique records buffered before a transform-and-flush cycle
    pub flush_threshold: usize,
    /// Abort the task on the first record-level transform failure
    pub stop_on_first_error: bool,
    pub task_timeout_ms: u64,
    /// How long a received work item stays invisible to other workers
    pub visibility_timeout_ms: u64,
    /// Sleep between empty polls of the work queue
    pub poll_interval_ms: u64,
    /// Record-level failures kept on the task result
    pub max_reported_failures: usize,
    /// In-process worker slots; each slot prefetches exactly one item
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            flush_threshold: defaults::FLUSH_THRESHOLD,
            stop_on_first_error: false,
            task_timeout_ms: defaults::TASK_TIMEOUT_MS,
            visibility_timeout_ms: defaults::VISIBILITY_TIMEOUT_MS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            max_reported_failures: defaults::MAX_REPORTED_FAILURES,
            concurrency: 1,
        }
    }
}

impl WorkerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.flush_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.flush_threshold",
                self.flush_threshold,
                "must be at least 1",
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.concurrency",
                self.concurrency,
                "must be at least 1",
            ));
        }
        if self.visibility_timeout_ms < self.task_timeout_ms {
            return Err(ConfigurationError::invalid_value(
                "worker.visibility_timeout_ms",
                self.visibility_timeout_ms,
                "must not be shorter than task_timeout_ms",
            ));
        }
        Ok(())
    }

    /// Configured worker id, or a generated `worker-<uuid8>` one
    pub fn resolve_worker_id(&self) -> String {
        self.worker_id.clone().unwrap_or_else(|| {
            let id = Uuid::new_v4().simple().to_string();
            format!("worker-{}", &id[..8])
        })
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub queue_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: defaults::QUEUE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// PostgreSQL URL for the durable store, queue and sink
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Attempts for a state transition hitting a transient store failure
    pub operation_retries: u32,
    pub operation_base_delay_ms: u64,
    pub operation_max_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            operation_retries: 5,
            operation_base_delay_ms: 100,
            operation_max_delay_ms: 5_000,
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "store.max_connections",
                self.max_connections,
                "must be at least 1",
            ));
        }
        if self.operation_max_delay_ms < self.operation_base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "store.operation_max_delay_ms",
                self.operation_max_delay_ms,
                "must not be smaller than operation_base_delay_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions older than this are removed by `cleanup_expired_sessions`
    pub retention_hours: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retention_hours: defaults::RETENTION_HOURS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DispatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(60));
        assert_eq!(config.queue.queue_name, "partition_queue");
    }

    #[test]
    fn rejects_visibility_shorter_than_task_timeout() {
        let mut config = DispatchConfig::default();
        config.worker.visibility_timeout_ms = 10;
        config.worker.task_timeout_ms = 20;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("visibility_timeout_ms"));
    }

    #[test]
    fn rejects_zero_flush_threshold() {
        let mut config = DispatchConfig::default();
        config.worker.flush_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let mut config = DispatchConfig::default();
        config.retry.base_delay_ms = 10_000;
        config.retry.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn planner_bounds_are_inclusive() {
        let planner = PlannerConfig {
            min_partition_size: 10,
            max_partition_size: 100,
        };
        assert!(planner.accepts(10));
        assert!(planner.accepts(100));
        assert!(!planner.accepts(9));
        assert!(!planner.accepts(101));
    }

    #[test]
    fn generated_worker_ids_are_prefixed() {
        let worker = WorkerConfig::default();
        let id = worker.resolve_worker_id();
        assert!(id.starts_with("worker-"));
        assert_eq!(id.len(), "worker-".len() + 8);

        let named = WorkerConfig {
            worker_id: Some("batch-1".to_string()),
            ..WorkerConfig::default()
        };
        assert_eq!(named.resolve_worker_id(), "batch-1");
    }
}
