//! Error types for partitioned dispatch.
//!

use crate::config::ConfigurationError;
use thiserror::Error;

/// Top-level error for every dispatch component.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Source unreadable or partition key absent during the pre-scan.
    #[error("Planning failed for session {session_id}: {reason}")]
    Planning { session_id: String, reason: String },

    /// Task creation or publication failed after local retries.
    #[error("Distribution failed for session {session_id}: {reason}")]
    Distribution { session_id: String, reason: String },

    #[error("Task execution failed: {0}")]
    TaskExecution(#[from] TaskExecutionError),

    /// Transient; callers retry state transitions instead of dropping them.
    #[error("State store unavailable: {0}")]
    StateStoreUnavailable(String),

    #[error("Work queue error: {0}")]
    Queue(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid transition for task {task_id}: {event} not allowed from {from}")]
    InvalidTransition {
        task_id: String,
        from: String,
        event: String,
    },

    /// Compare-and-swap lost: the task changed status underneath the caller.
    #[error("Concurrent modification of task {task_id}")]
    Conflict { task_id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl DispatchError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_transition(
        task_id: impl Into<String>,
        from: impl ToString,
        event: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            task_id: task_id.into(),
            from: from.to_string(),
            event: event.to_string(),
        }
    }

    /// Errors worth retrying with backoff rather than surfacing immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StateStoreUnavailable(_) | Self::Queue(_))
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DispatchError::StateStoreUnavailable(err.to_string())
            }
            other => DispatchError::Database(other.to_string()),
        }
    }
}

/// Task-level failures. Every variant ends up as the task's `last_error` and
/// drives the retry supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskExecutionError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("transform aborted at record {record_id}: {reason}")]
    TransformAborted { record_id: String, reason: String },

    #[error("task exceeded time limit of {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("cancelled")]
    Cancelled,
}

pub type DispatchResult<T> = Result<T, DispatchError>;
