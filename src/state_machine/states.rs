use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status as persisted in the state store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by the distributor or reset for a retry
    #[default]
    Pending,
    /// Claimed by a worker
    Processing,
    /// Full scan finished and results flushed
    Completed,
    /// Last attempt failed; terminal once dead-lettered
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Work is still outstanding for this task
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// Session lifecycle status.
///
/// `Cancelled` extends the submission lifecycle
/// (`created → planning → distributing → running → completed | failed |
/// partially_failed`). It is terminal like the other finished states, and
/// progress reports for a cancelled session carry it as their status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Created,
    Planning,
    Distributing,
    Running,
    /// Every task completed
    Completed,
    /// Planning or distribution failed, or no task completed
    Failed,
    /// Some tasks completed, at least one is terminally failed
    PartiallyFailed,
    /// Cancelled by an operator; no further retries are scheduled
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::Distributing => "distributing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyFailed => "partially_failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// No automatic progress happens from this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::PartiallyFailed | Self::Cancelled
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "planning" => Ok(Self::Planning),
            "distributing" => Ok(Self::Distributing),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partially_failed" => Ok(Self::PartiallyFailed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid session status: {s}")),
        }
    }
}
