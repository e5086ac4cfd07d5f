//! # System Constants
//!
//! Persisted key layout, default values, and status groups shared by the
//! state store implementations and the orchestration layer.

use crate::state_machine::TaskStatus;

/// Logical key layout of the state store.
///
/// ```text
/// session:{id}                     -> session fields
/// session:{id}:tasks               -> every task id of the session
/// session:{id}:{status}            -> task ids currently in that status
/// session:{id}:dead                -> terminally failed task ids
/// task:{id}                        -> task fields
/// sessions                         -> index of all session ids
/// ```
pub mod keys {
    use crate::state_machine::TaskStatus;

    pub const SESSION_INDEX: &str = "sessions";

    pub fn session(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    pub fn session_tasks(session_id: &str) -> String {
        format!("session:{session_id}:tasks")
    }

    pub fn session_status_set(session_id: &str, status: TaskStatus) -> String {
        format!("session:{session_id}:{status}")
    }

    pub fn session_dead_set(session_id: &str) -> String {
        format!("session:{session_id}:dead")
    }

    pub fn task(task_id: &str) -> String {
        format!("task:{task_id}")
    }
}

/// Default values used when configuration does not override them
pub mod defaults {
    pub const QUEUE_NAME: &str = "partition_queue";
    pub const MAX_RETRIES: u32 = 3;
    pub const BASE_DELAY_MS: u64 = 60_000;
    pub const MAX_DELAY_MS: u64 = 3_600_000;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const FLUSH_THRESHOLD: usize = 1_000;
    pub const TASK_TIMEOUT_MS: u64 = 3_300_000;
    pub const VISIBILITY_TIMEOUT_MS: u64 = 3_600_000;
    pub const POLL_INTERVAL_MS: u64 = 500;
    pub const MAX_REPORTED_FAILURES: usize = 100;
    pub const RETENTION_HOURS: u64 = 24;
}

/// Reason recorded on tasks failed by a session-level cancel.
pub const CANCELLED_REASON: &str = "cancelled";

/// Task statuses grouped by how the aggregator and finalizer treat them.
pub mod status_groups {
    use super::TaskStatus;

    /// Statuses that still have work outstanding.
    pub const ACTIVE: &[TaskStatus] = &[TaskStatus::Pending, TaskStatus::Processing];

    /// Statuses a session-level cancel moves to `failed`.
    pub const CANCELLABLE: &[TaskStatus] = &[TaskStatus::Pending, TaskStatus::Processing];

    pub const ALL: &[TaskStatus] = &[
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];
}

/// Deterministic task id for a session partition. Distribution relies on this
/// being stable so re-running it never duplicates tasks.
pub fn task_id_for(session_id: &str, remainder: u32) -> String {
    format!("{session_id}-p{remainder:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(keys::session("s1"), "session:s1");
        assert_eq!(
            keys::session_status_set("s1", TaskStatus::Processing),
            "session:s1:processing"
        );
        assert_eq!(keys::session_dead_set("s1"), "session:s1:dead");
        assert_eq!(keys::task("s1-p000003"), "task:s1-p000003");
    }

    #[test]
    fn task_ids_are_stable_per_remainder() {
        assert_eq!(task_id_for("session_ab", 3), "session_ab-p000003");
        assert_eq!(task_id_for("session_ab", 3), task_id_for("session_ab", 3));
        assert_ne!(task_id_for("session_ab", 3), task_id_for("session_ab", 4));
    }
}
