//! # Partition Workers
//!
//! [`TaskWorker`] runs the single-task protocol against a shared
//! [`WorkerContext`]; [`WorkerPool`] runs several of them in one process.

pub mod buffer;
pub mod executor;
pub mod pool;

pub use buffer::BatchBuffer;
pub use executor::{SkipReason, TaskOutcome, TaskWorker, WorkerContext, WorkerStats};
pub use pool::WorkerPool;
