use super::events::TaskEvent;
use super::states::TaskStatus;
use crate::error::{DispatchError, DispatchResult};
use crate::models::Task;

/// Guard conditions for task transitions
#[derive(Debug)]
pub struct TransitionGuard;

impl TransitionGuard {
    /// Resolve the target status of `event` applied to `task`, or reject it
    pub fn target_status(task: &Task, event: &TaskEvent) -> DispatchResult<TaskStatus> {
        use TaskEvent::*;
        use TaskStatus::*;

        let dead = task.is_dead();
        let target = match (task.status, event) {
            (Pending, Claim { .. }) => Some(Processing),
            (Processing, Reclaim { .. }) => Some(Processing),

            (Processing, Complete { .. }) => Some(Completed),
            (Processing, Fail { .. }) => Some(Failed),

            (Failed, Requeue) if !dead && task.can_retry() => Some(Pending),
            (Failed, DeadLetter) if !dead => Some(Failed),

            (Pending | Processing, Cancel) => Some(Failed),
            (Failed, Cancel) if !dead => Some(Failed),

            (Failed, Resubmit) if dead => Some(Pending),

            _ => None,
        };

        target.ok_or_else(|| {
            let from = if dead {
                "failed (dead)".to_string()
            } else {
                task.status.to_string()
            };
            DispatchError::invalid_transition(&task.task_id, from, event)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskResult;
    use chrono::Utc;

    fn task(status: TaskStatus) -> Task {
        let mut task = Task::new("s1", 0, 4, 3, Utc::now());
        task.status = status;
        task
    }

    #[test]
    fn claim_only_from_pending() {
        let claim = TaskEvent::Claim {
            worker_id: "w1".into(),
        };
        assert_eq!(
            TransitionGuard::target_status(&task(TaskStatus::Pending), &claim).unwrap(),
            TaskStatus::Processing
        );
        assert!(TransitionGuard::target_status(&task(TaskStatus::Processing), &claim).is_err());
        assert!(TransitionGuard::target_status(&task(TaskStatus::Completed), &claim).is_err());
    }

    #[test]
    fn completed_is_terminal() {
        let completed = task(TaskStatus::Completed);
        for event in [
            TaskEvent::Complete {
                result: TaskResult::default(),
            },
            TaskEvent::Fail {
                error: "boom".into(),
            },
            TaskEvent::Requeue,
            TaskEvent::Cancel,
            TaskEvent::Resubmit,
        ] {
            assert!(TransitionGuard::target_status(&completed, &event).is_err());
        }
    }

    #[test]
    fn requeue_respects_retry_budget() {
        let mut failed = task(TaskStatus::Failed);
        failed.retry_count = 2;
        assert!(TransitionGuard::target_status(&failed, &TaskEvent::Requeue).is_ok());

        failed.retry_count = 3;
        assert!(TransitionGuard::target_status(&failed, &TaskEvent::Requeue).is_err());
        assert!(TransitionGuard::target_status(&failed, &TaskEvent::DeadLetter).is_ok());
    }

    #[test]
    fn resubmit_requires_dead_task() {
        let mut failed = task(TaskStatus::Failed);
        assert!(TransitionGuard::target_status(&failed, &TaskEvent::Resubmit).is_err());

        failed.dead_lettered_at = Some(Utc::now());
        assert_eq!(
            TransitionGuard::target_status(&failed, &TaskEvent::Resubmit).unwrap(),
            TaskStatus::Pending
        );
        assert!(TransitionGuard::target_status(&failed, &TaskEvent::Cancel).is_err());
    }

    #[test]
    fn error_names_the_rejected_event() {
        let err = TransitionGuard::target_status(&task(TaskStatus::Pending), &TaskEvent::Requeue)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid transition for task s1-p000000: requeue not allowed from pending"
        );
    }
}
