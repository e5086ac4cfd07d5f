//! # Data Model
//!
//! Persisted session and task metadata, the queue message, and the derived
//! progress view. Processed records themselves are never stored here.

pub mod progress;
pub mod session;
pub mod task;
pub mod work_item;

pub use progress::{PerformanceMetrics, SessionProgress, TaskCounts};
pub use session::{PartitionPlan, PlanSummary, Session, SessionRequest};
pub use task::{RecordFailure, Task, TaskResult};
pub use work_item::WorkItem;
