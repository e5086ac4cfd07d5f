use crate::models::TaskResult;
use std::fmt;

/// Events that drive task status transitions
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A worker claims a pending task
    Claim { worker_id: String },
    /// A worker takes over a processing task whose claim went stale
    Reclaim { worker_id: String },
    /// Full scan finished
    Complete { result: TaskResult },
    /// Task-level failure
    Fail { error: String },
    /// Retry supervisor schedules another attempt
    Requeue,
    /// Retries exhausted; the task stays failed
    DeadLetter,
    /// Session-level cancel
    Cancel,
    /// Manual resubmission of a dead task
    Resubmit,
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Reclaim { .. } => "reclaim",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Requeue => "requeue",
            Self::DeadLetter => "dead_letter",
            Self::Cancel => "cancel",
            Self::Resubmit => "resubmit",
        }
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
