use super::events::TaskEvent;
use super::guards::TransitionGuard;
use crate::constants::CANCELLED_REASON;
use crate::error::DispatchResult;
use crate::models::Task;
use chrono::{DateTime, Utc};

/// Pure task lifecycle: computes the next task record for an event.
///
/// Persistence is the caller's job; the store writes the returned record with
/// a compare-and-swap on the previous status.
#[derive(Debug)]
pub struct TaskStateMachine;

impl TaskStateMachine {
    pub fn apply(task: &Task, event: TaskEvent, now: DateTime<Utc>) -> DispatchResult<Task> {
        let target = TransitionGuard::target_status(task, &event)?;

        let mut next = task.clone();
        next.status = target;
        next.updated_at = now;

        match event {
            TaskEvent::Claim { worker_id } | TaskEvent::Reclaim { worker_id } => {
                next.worker_id = Some(worker_id);
                next.started_at = Some(now);
                next.finished_at = None;
            }
            TaskEvent::Complete { result } => {
                next.finished_at = Some(now);
                next.result = Some(result);
                next.last_error = None;
            }
            TaskEvent::Fail { error } => {
                next.finished_at = Some(now);
                next.last_error = Some(error);
            }
            TaskEvent::Requeue => {
                next.retry_count += 1;
                next.worker_id = None;
                next.started_at = None;
                next.finished_at = None;
            }
            TaskEvent::DeadLetter => {
                next.dead_lettered_at = Some(now);
            }
            TaskEvent::Cancel => {
                next.last_error = Some(CANCELLED_REASON.to_string());
                next.finished_at.get_or_insert(now);
                next.dead_lettered_at = Some(now);
            }
            TaskEvent::Resubmit => {
                next.retry_count = 0;
                next.worker_id = None;
                next.started_at = None;
                next.finished_at = None;
                next.dead_lettered_at = None;
                next.result = None;
            }
        }

        Ok(next)
    }
}
