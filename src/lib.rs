#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Partition Dispatch
//!
//! Hash-partitioned distribution of bulk record processing across independent
//! workers.
//!
//! ## Overview
//!
//! A *session* covers one data source. A narrow pre-scan of the partition key
//! column fixes the partition count, one *task* is created per remainder, and
//! each worker re-derives its record subset by evaluating
//! `hash(key) mod total_partitions == remainder` over a full scan. Progress and
//! failures live in a shared state store that any caller can poll.
//!
//! Delivery is at-least-once. Partitioning and transformation are pure and
//! sink writes are upserts keyed by the partition key value, so a task that
//! runs twice leaves the same sink state as one that runs once.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - planner, distributor, retry supervisor, progress, coordinator
//! - [`worker`] - single-task protocol, batch buffer, worker pool
//! - [`store`] - state store trait with in-memory and PostgreSQL backends
//! - [`messaging`] - work queue trait with in-memory and PostgreSQL backends
//! - [`source`], [`sink`], [`transform`] - record I/O and conversion collaborators
//! - [`state_machine`] - task lifecycle transitions
//! - [`partitioning`] - stable key hashing
//! - [`config`] - layered configuration
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use partition_dispatch::config::DispatchConfig;
//! use partition_dispatch::messaging::InMemoryWorkQueue;
//! use partition_dispatch::models::SessionRequest;
//! use partition_dispatch::orchestration::BatchCoordinator;
//! use partition_dispatch::source::JsonLinesSource;
//! use partition_dispatch::store::MemoryStateStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = BatchCoordinator::new(
//!     DispatchConfig::default(),
//!     Arc::new(MemoryStateStore::new()),
//!     Arc::new(InMemoryWorkQueue::new("partition_queue")),
//!     Arc::new(JsonLinesSource::new()),
//! );
//!
//! let session_id = coordinator
//!     .create_session(SessionRequest::new("data/queries.jsonl", "query_hash", 10_000))
//!     .await?;
//! let progress = coordinator.get_session_status(&session_id).await?;
//! println!("{} of {} tasks finished", progress.completed + progress.dead, progress.total);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod partitioning;
pub mod resilience;
pub mod sink;
pub mod source;
pub mod state_machine;
pub mod store;
pub mod transform;
pub mod worker;

pub use config::{ConfigManager, DispatchConfig};
pub use error::{DispatchError, DispatchResult, TaskExecutionError};
pub use models::{Session, SessionProgress, SessionRequest, Task, TaskResult, WorkItem};
pub use orchestration::{BatchCoordinator, PartitionPlanner, RetrySupervisor, TaskDistributor};
pub use state_machine::{SessionStatus, TaskStatus};
pub use worker::{TaskOutcome, TaskWorker, WorkerContext, WorkerPool};
