//! # Session Progress
//!
//! Read-side rollup of per-task statuses. Nothing here is persisted; every
//! value is derived from the task records at query time.

use super::{Session, Task};
use crate::state_machine::{SessionStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counts of a session's tasks by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    /// Every task in `failed`, dead or awaiting requeue
    pub failed: u64,
    /// Subset of `failed` that is terminal
    pub dead: u64,
}

impl TaskCounts {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            counts.total += 1;
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => {
                    counts.failed += 1;
                    if task.is_dead() {
                        counts.dead += 1;
                    }
                }
            }
        }
        counts
    }

    /// Tasks that need no further automatic action
    pub fn finished(&self) -> u64 {
        self.completed + self.dead
    }

    /// Pending, processing, or failed but not yet dead
    pub fn outstanding(&self) -> u64 {
        self.total - self.finished()
    }

    /// Aggregate session status once every task is finished.
    ///
    /// Returns `None` while work is outstanding or while the session has no
    /// tasks yet.
    pub fn derive_status(&self) -> Option<SessionStatus> {
        if self.total == 0 || self.outstanding() > 0 {
            return None;
        }
        Some(if self.completed == self.total {
            SessionStatus::Completed
        } else if self.completed > 0 {
            SessionStatus::PartiallyFailed
        } else {
            SessionStatus::Failed
        })
    }

    /// Finished share of the session in percent, one decimal
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let raw = self.finished() as f64 / self.total as f64 * 100.0;
        (raw * 10.0).round() / 10.0
    }
}

/// Throughput figures for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub elapsed_seconds: f64,
    /// `None` until at least one task has finished
    pub estimated_remaining_seconds: Option<f64>,
    pub tasks_per_second: f64,
}

impl PerformanceMetrics {
    pub fn compute(session: &Session, counts: &TaskCounts, now: DateTime<Utc>) -> Self {
        let end = session.finished_at.unwrap_or(now);
        let elapsed_ms = end
            .signed_duration_since(session.created_at)
            .num_milliseconds()
            .max(0);
        let elapsed_seconds = elapsed_ms as f64 / 1000.0;

        let finished = counts.finished();
        let tasks_per_second = if elapsed_seconds > 0.0 {
            finished as f64 / elapsed_seconds
        } else {
            0.0
        };
        let estimated_remaining_seconds = (finished > 0).then(|| {
            let per_task = elapsed_seconds / finished as f64;
            per_task * counts.outstanding() as f64
        });

        Self {
            elapsed_seconds,
            estimated_remaining_seconds,
            tasks_per_second,
        }
    }
}

/// Best-known state of a session, as served to status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub status: SessionStatus,
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
    pub percentage: f64,
    /// Terminally failed tasks, sorted, for individual resubmission
    pub dead_task_ids: Vec<String>,
    pub performance: PerformanceMetrics,
}

impl SessionProgress {
    pub fn build(session: &Session, tasks: &[Task], now: DateTime<Utc>) -> Self {
        let counts = TaskCounts::from_tasks(tasks);

        let mut dead_task_ids: Vec<String> = tasks
            .iter()
            .filter(|task| task.is_dead())
            .map(|task| task.task_id.clone())
            .collect();
        dead_task_ids.sort();

        // A stored terminal status wins; otherwise report what the tasks say.
        let status = if session.status.is_terminal() {
            session.status
        } else {
            counts.derive_status().unwrap_or(session.status)
        };

        Self {
            session_id: session.session_id.clone(),
            status,
            total: counts.total,
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            dead: counts.dead,
            percentage: counts.percentage(),
            dead_task_ids,
            performance: PerformanceMetrics::compute(session, &counts, now),
        }
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts {
            total: self.total,
            pending: self.pending,
            processing: self.processing,
            completed: self.completed,
            failed: self.failed,
            dead: self.dead,
        }
    }
}
