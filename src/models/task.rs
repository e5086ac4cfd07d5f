//! # Task Model
//!
//! One partition assignment of a session: the subset of source records whose
//! key hashes to `remainder` modulo `total_partitions`.

use crate::constants::task_id_for;
use crate::state_machine::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted task record (`task:{id}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub session_id: String,
    /// `0 <= remainder < total_partitions`
    pub remainder: u32,
    pub total_partitions: u32,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set when the task entered the session's dead set
    pub dead_lettered_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    /// Bumped by the state store on every successful compare-and-swap
    #[serde(default)]
    pub version: u64,
}

impl Task {
    /// Fresh pending task for one remainder of a session
    pub fn new(
        session_id: &str,
        remainder: u32,
        total_partitions: u32,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id_for(session_id, remainder),
            session_id: session_id.to_string(),
            remainder,
            total_partitions,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries,
            worker_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            dead_lettered_at: None,
            result: None,
            version: 0,
        }
    }

    /// Terminally failed: retries exhausted or cancelled
    pub fn is_dead(&self) -> bool {
        self.status == TaskStatus::Failed && self.dead_lettered_at.is_some()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// No further automatic action will happen for this task
    pub fn is_finished(&self) -> bool {
        self.status == TaskStatus::Completed || self.is_dead()
    }

    /// Claim older than `stale_after` at `now`; only then may another worker
    /// take the task over.
    pub fn claim_is_stale(&self, now: DateTime<Utc>, stale_after: std::time::Duration) -> bool {
        match self.started_at {
            Some(started_at) => {
                let age = now.signed_duration_since(started_at);
                age.to_std().map(|age| age >= stale_after).unwrap_or(false)
            }
            None => true,
        }
    }
}

/// Outcome summary recorded on a completed task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Source records read during the scan
    pub records_scanned: u64,
    /// Records whose key hashed to this partition
    pub records_matched: u64,
    /// Distinct keys among the matched records
    pub unique_records: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Records without a usable partition key
    pub skipped: u64,
    pub flushes: u64,
    pub duration_ms: u64,
    pub records_per_second: f64,
    /// First record-level failures, capped by `max_reported_failures`
    pub record_failures: Vec<RecordFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub record_id: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_task_is_pending_with_stable_id() {
        let task = Task::new("session_1", 7, 8, 3, Utc::now());
        assert_eq!(task.task_id, "session_1-p000007");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.can_retry());
        assert!(!task.is_finished());
    }

    #[test]
    fn stale_claim_detection() {
        let now = Utc::now();
        let mut task = Task::new("s", 0, 1, 3, now);
        task.status = TaskStatus::Processing;
        task.started_at = Some(now - Duration::seconds(30));

        assert!(!task.claim_is_stale(now, std::time::Duration::from_secs(60)));
        assert!(task.claim_is_stale(now, std::time::Duration::from_secs(10)));
    }

    #[test]
    fn dead_requires_failed_status() {
        let mut task = Task::new("s", 0, 1, 0, Utc::now());
        task.dead_lettered_at = Some(Utc::now());
        assert!(!task.is_dead());

        task.status = TaskStatus::Failed;
        assert!(task.is_dead());
        assert!(task.is_finished());
        assert!(!task.can_retry());
    }
}
