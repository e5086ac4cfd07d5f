//! # Orchestration
//!
//! Session-level coordination around the partition workers.
//!
//! ## Components
//!
//! - **PartitionPlanner**: narrow pre-scan that fixes the partition count
//! - **TaskDistributor**: one task per remainder, published to the work queue
//! - **RetrySupervisor**: requeue with backoff or dead-letter after a failure
//! - **ProgressAggregator**: read-only session rollup
//! - **SessionFinalizer**: writes the session outcome once no work is left
//! - **BatchCoordinator**: the external entry point tying these together

pub mod backoff;
pub mod coordinator;
pub mod distributor;
pub mod finalizer;
pub mod planner;
pub mod progress;
pub mod retry;

pub use backoff::{BackoffCalculator, BackoffCalculatorConfig};
pub use coordinator::{BatchCoordinator, CancelSummary};
pub use distributor::TaskDistributor;
pub use finalizer::SessionFinalizer;
pub use planner::{PartitionPlanner, PlanningError};
pub use progress::ProgressAggregator;
pub use retry::{RetryDecision, RetrySupervisor};
