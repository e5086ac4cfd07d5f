//! # Batch Coordinator
//!
//! External entry point for sessions: submission, status queries, manual
//! resubmission, cancellation, and housekeeping. Submission runs the session
//! lifecycle `created → planning → distributing → running`; workers and the
//! finalizer take it from there.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::backoff::{BackoffCalculator, BackoffCalculatorConfig};
use super::distributor::TaskDistributor;
use super::finalizer::SessionFinalizer;
use super::planner::PartitionPlanner;
use super::progress::ProgressAggregator;
use super::retry::RetrySupervisor;
use crate::config::DispatchConfig;
use crate::constants::CANCELLED_REASON;
use crate::error::{DispatchError, DispatchResult};
use crate::logging::{log_session_operation, log_task_operation};
use crate::messaging::WorkQueue;
use crate::models::{Session, SessionProgress, SessionRequest, Task};
use crate::resilience::RetryPolicy;
use crate::source::RecordSource;
use crate::state_machine::{SessionStatus, TaskEvent, TaskStateMachine, TaskStatus};
use crate::store::StateStore;

/// Attempts at a contended compare-and-swap before giving up
const MAX_SWAP_ATTEMPTS: usize = 16;

/// Outcome of a session cancel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSummary {
    pub session_id: String,
    /// Tasks moved to dead `failed` by this call
    pub cancelled_task_ids: Vec<String>,
}

pub struct BatchCoordinator {
    config: DispatchConfig,
    store: Arc<dyn StateStore>,
    planner: PartitionPlanner,
    distributor: TaskDistributor,
    supervisor: Arc<RetrySupervisor>,
    aggregator: ProgressAggregator,
    finalizer: Arc<SessionFinalizer>,
    retry: RetryPolicy,
}

impl BatchCoordinator {
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        source: Arc<dyn RecordSource>,
    ) -> Self {
        let retry = RetryPolicy::from(&config.store);
        let backoff = BackoffCalculator::new(BackoffCalculatorConfig::from(&config.retry));
        Self {
            planner: PartitionPlanner::new(source),
            distributor: TaskDistributor::new(store.clone(), queue.clone(), retry.clone()),
            supervisor: Arc::new(RetrySupervisor::new(
                store.clone(),
                queue,
                backoff,
                retry.clone(),
            )),
            aggregator: ProgressAggregator::new(store.clone()),
            finalizer: Arc::new(SessionFinalizer::new(store.clone(), retry.clone())),
            config,
            store,
            retry,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Shared with workers so every failure goes through one retry policy
    pub fn supervisor(&self) -> Arc<RetrySupervisor> {
        self.supervisor.clone()
    }

    pub fn finalizer(&self) -> Arc<SessionFinalizer> {
        self.finalizer.clone()
    }

    /// Plan and distribute a new session, returning its id.
    ///
    /// A planning or distribution failure leaves the session persisted as
    /// `failed` with the reason, and the error is returned.
    #[instrument(skip(self, request), fields(source_ref = %request.source_ref))]
    pub async fn create_session(&self, request: SessionRequest) -> DispatchResult<String> {
        self.validate_request(&request)?;

        let mut session = Session::new(&request, self.config.retry.max_retries, Utc::now());
        let session_id = session.session_id.clone();

        let store = &self.store;
        let created = &session;
        if !self
            .retry
            .run("create_session", move || store.create_session(created))
            .await?
        {
            return Err(DispatchError::Validation(format!(
                "session {session_id} already exists"
            )));
        }
        log_session_operation("create", &session_id, session.status.as_str(), None);

        if !self.advance(&mut session, SessionStatus::Planning).await? {
            return Ok(session_id);
        }

        let plan = match self
            .planner
            .plan(
                &session.source_ref,
                &session.partition_key_field,
                session.target_partition_size,
            )
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                let reason = e.to_string();
                self.fail_session(&mut session, &reason).await?;
                return Err(DispatchError::Planning { session_id, reason });
            }
        };

        session.plan = Some(plan.summary());
        if !self.advance(&mut session, SessionStatus::Distributing).await? {
            return Ok(session_id);
        }

        if let Err(e) = self
            .distributor
            .distribute(&session, plan.partition_count)
            .await
        {
            let reason = e.to_string();
            self.fail_session(&mut session, &reason).await?;
            return Err(DispatchError::Distribution { session_id, reason });
        }

        if !self.advance(&mut session, SessionStatus::Running).await? {
            // Cancelled while distributing; sweep the tasks created meanwhile.
            self.cancel_tasks(&session_id).await?;
            return Ok(session_id);
        }

        // Workers may have finished every task before the session was running.
        self.finalizer.finalize(&session_id).await?;
        info!(
            session_id = %session_id,
            partition_count = plan.partition_count,
            "Session running"
        );
        Ok(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> DispatchResult<Session> {
        let store = &self.store;
        self.retry
            .run("get_session", move || store.get_session(session_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("session", session_id))
    }

    pub async fn get_session_status(&self, session_id: &str) -> DispatchResult<SessionProgress> {
        self.aggregator.status(session_id).await
    }

    pub async fn get_task_status(&self, task_id: &str) -> DispatchResult<Task> {
        let store = &self.store;
        self.retry
            .run("get_task", move || store.get_task(task_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("task", task_id))
    }

    /// Every task of a session, sorted by remainder
    pub async fn list_session_tasks(&self, session_id: &str) -> DispatchResult<Vec<Task>> {
        self.get_session(session_id).await?;
        self.load_tasks(session_id).await
    }

    /// Manually resubmit a terminally failed task with a fresh retry budget
    #[instrument(skip(self))]
    pub async fn retry_task(&self, task_id: &str) -> DispatchResult<Task> {
        let task = self.get_task_status(task_id).await?;
        let mut session = self.get_session(&task.session_id).await?;
        if session.is_cancelled() {
            return Err(DispatchError::Validation(format!(
                "session {} is cancelled; task {task_id} cannot be retried",
                session.session_id
            )));
        }

        let next = TaskStateMachine::apply(&task, TaskEvent::Resubmit, Utc::now())?;
        let resubmitted = self
            .swap_task(&task, &next)
            .await?
            .ok_or_else(|| DispatchError::Conflict {
                task_id: task_id.to_string(),
            })?;

        // A finished session is running again until this task settles.
        if matches!(
            session.status,
            SessionStatus::Failed | SessionStatus::PartiallyFailed
        ) {
            let expected = session.status;
            let mut reopened = session.clone();
            reopened.transition_to(SessionStatus::Running, Utc::now());
            reopened.status_reason = None;
            if self.swap_session(expected, &reopened).await? {
                log_session_operation("reopen", &session.session_id, reopened.status.as_str(), None);
                session = reopened;
            }
        }

        self.distributor.publish(&session, &resubmitted).await?;
        log_task_operation(
            "resubmit",
            &session.session_id,
            task_id,
            Some(resubmitted.remainder),
            resubmitted.status.as_str(),
            None,
        );
        Ok(resubmitted)
    }

    /// Cancel a session: no further retries, and every task with work
    /// outstanding becomes dead `failed` with reason "cancelled".
    ///
    /// Cancelling an already cancelled session is a no-op sweep.
    #[instrument(skip(self))]
    pub async fn cancel_session(&self, session_id: &str) -> DispatchResult<CancelSummary> {
        let mut attempts = 0;
        loop {
            let session = self.get_session(session_id).await?;
            if session.is_cancelled() {
                break;
            }
            if session.status.is_terminal() {
                return Err(DispatchError::Validation(format!(
                    "session {session_id} already finished as {}",
                    session.status
                )));
            }

            let now = Utc::now();
            let mut cancelled = session.clone();
            cancelled.cancelled_at = Some(now);
            cancelled.transition_to(SessionStatus::Cancelled, now);
            cancelled.status_reason = Some(CANCELLED_REASON.to_string());

            if self.swap_session(session.status, &cancelled).await? {
                log_session_operation("cancel", session_id, cancelled.status.as_str(), None);
                break;
            }

            attempts += 1;
            if attempts >= MAX_SWAP_ATTEMPTS {
                return Err(DispatchError::Validation(format!(
                    "session {session_id} kept changing during cancel"
                )));
            }
        }

        let cancelled_task_ids = self.cancel_tasks(session_id).await?;
        info!(
            session_id,
            cancelled_tasks = cancelled_task_ids.len(),
            "Session cancelled"
        );
        Ok(CancelSummary {
            session_id: session_id.to_string(),
            cancelled_task_ids,
        })
    }

    /// Remove sessions created more than `retention_hours` before `now`,
    /// along with all of their tasks.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_sessions(&self, now: DateTime<Utc>) -> DispatchResult<Vec<String>> {
        let hours = i64::try_from(self.config.session.retention_hours).unwrap_or(i64::MAX);
        let retention = chrono::Duration::try_hours(hours).unwrap_or(chrono::Duration::MAX);

        let store = &self.store;
        let sessions = self
            .retry
            .run("list_sessions", move || store.list_sessions())
            .await?;

        let mut removed = Vec::new();
        for session in sessions {
            if now.signed_duration_since(session.created_at) <= retention {
                continue;
            }
            let session_id = session.session_id.as_str();
            if self
                .retry
                .run("delete_session", move || store.delete_session(session_id))
                .await?
            {
                log_session_operation("cleanup", session_id, session.status.as_str(), None);
                removed.push(session.session_id.clone());
            }
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), "Cleaned up expired sessions");
        }
        Ok(removed)
    }

    /// Republish work for tasks of a running session that may have lost their
    /// queue item: every `pending` task, and `processing` tasks claimed at
    /// least `older_than` ago. Duplicate deliveries are absorbed by the claim
    /// rules on the worker. A session whose tasks have all settled is
    /// finalized instead.
    #[instrument(skip(self))]
    pub async fn recover_stalled_tasks(
        &self,
        session_id: &str,
        older_than: Duration,
    ) -> DispatchResult<Vec<String>> {
        let session = self.get_session(session_id).await?;
        if session.status != SessionStatus::Running {
            return Ok(Vec::new());
        }
        // Every task may have settled without the session being finalized.
        if self.finalizer.finalize(session_id).await?.is_some() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut republished = Vec::new();
        for task in self.load_tasks(session_id).await? {
            let stalled = match task.status {
                TaskStatus::Pending => true,
                TaskStatus::Processing => task.claim_is_stale(now, older_than),
                TaskStatus::Completed | TaskStatus::Failed => false,
            };
            if stalled {
                self.distributor.publish(&session, &task).await?;
                republished.push(task.task_id);
            }
        }

        if !republished.is_empty() {
            warn!(
                session_id,
                count = republished.len(),
                "Republished stalled tasks"
            );
        }
        Ok(republished)
    }

    fn validate_request(&self, request: &SessionRequest) -> DispatchResult<()> {
        if request.source_ref.trim().is_empty() {
            return Err(DispatchError::Validation(
                "source_ref must not be empty".into(),
            ));
        }
        if request.partition_key_field.trim().is_empty() {
            return Err(DispatchError::Validation(
                "partition_key_field must not be empty".into(),
            ));
        }
        let planner = &self.config.planner;
        if !planner.accepts(request.target_partition_size) {
            return Err(DispatchError::Validation(format!(
                "target_partition_size {} outside [{}, {}]",
                request.target_partition_size,
                planner.min_partition_size,
                planner.max_partition_size
            )));
        }
        Ok(())
    }

    /// Move the session forward one lifecycle step. `false` means the session
    /// was changed underneath (cancelled) and submission should stop.
    async fn advance(&self, session: &mut Session, to: SessionStatus) -> DispatchResult<bool> {
        let expected = session.status;
        let mut next = session.clone();
        next.transition_to(to, Utc::now());

        let swapped = self.swap_session(expected, &next).await?;
        if swapped {
            log_session_operation("transition", &session.session_id, to.as_str(), None);
            *session = next;
        } else {
            warn!(
                session_id = %session.session_id,
                expected = %expected,
                "Session changed during submission"
            );
        }
        Ok(swapped)
    }

    async fn fail_session(&self, session: &mut Session, reason: &str) -> DispatchResult<()> {
        error!(session_id = %session.session_id, reason, "Session failed");
        let mut failed = session.clone();
        failed.transition_to(SessionStatus::Failed, Utc::now());
        failed.status_reason = Some(reason.to_string());

        if self.swap_session(session.status, &failed).await? {
            log_session_operation(
                "fail",
                &session.session_id,
                failed.status.as_str(),
                Some(reason),
            );
            *session = failed;
        }
        Ok(())
    }

    async fn cancel_tasks(&self, session_id: &str) -> DispatchResult<Vec<String>> {
        let mut cancelled = Vec::new();
        for task in self.load_tasks(session_id).await? {
            let task_id = task.task_id.clone();
            if self.cancel_task(task).await? {
                cancelled.push(task_id);
            }
        }
        Ok(cancelled)
    }

    /// Mark one task dead with the cancel reason, re-reading on contention.
    /// Returns `false` when the task had already finished.
    async fn cancel_task(&self, mut task: Task) -> DispatchResult<bool> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            if task.is_finished() {
                return Ok(false);
            }
            let next = TaskStateMachine::apply(&task, TaskEvent::Cancel, Utc::now())?;
            if self.swap_task(&task, &next).await?.is_some() {
                log_task_operation(
                    "cancel",
                    &task.session_id,
                    &task.task_id,
                    Some(task.remainder),
                    next.status.as_str(),
                    Some(CANCELLED_REASON),
                );
                return Ok(true);
            }
            task = self.get_task_status(&task.task_id).await?;
        }
        Err(DispatchError::Conflict {
            task_id: task.task_id,
        })
    }

    async fn load_tasks(&self, session_id: &str) -> DispatchResult<Vec<Task>> {
        let store = &self.store;
        self.retry
            .run("list_session_tasks", move || {
                store.list_session_tasks(session_id)
            })
            .await
    }

    async fn swap_session(&self, expected: SessionStatus, next: &Session) -> DispatchResult<bool> {
        let store = &self.store;
        self.retry
            .run("compare_and_swap_session", move || {
                store.compare_and_swap_session(expected, next)
            })
            .await
    }

    async fn swap_task(&self, expected: &Task, next: &Task) -> DispatchResult<Option<Task>> {
        let store = &self.store;
        self.retry
            .run("compare_and_swap_task", move || {
                store.compare_and_swap_task(expected, next)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryWorkQueue;
    use crate::source::{MemorySource, Record};
    use crate::store::MemoryStateStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStateStore>,
        queue: Arc<InMemoryWorkQueue>,
        coordinator: BatchCoordinator,
    }

    fn fixture(keys: usize) -> Fixture {
        let source = MemorySource::new();
        let records = (0..keys)
            .map(|i| match json!({"query": format!("q{i}")}) {
                serde_json::Value::Object(fields) => Record::new(fields),
                _ => unreachable!(),
            })
            .collect();
        source.insert("src", records);

        let mut config = DispatchConfig::default();
        config.store.operation_base_delay_ms = 1;
        config.store.operation_max_delay_ms = 2;

        let store = Arc::new(MemoryStateStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new("partition_queue"));
        let coordinator =
            BatchCoordinator::new(config, store.clone(), queue.clone(), Arc::new(source));
        Fixture {
            store,
            queue,
            coordinator,
        }
    }

    async fn submit(f: &Fixture) -> String {
        f.coordinator
            .create_session(SessionRequest::new("src", "query", 10))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn submission_plans_and_distributes() {
        let f = fixture(40);
        let id = submit(&f).await;

        let session = f.coordinator.get_session(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.partition_count(), Some(4));
        assert_eq!(f.queue.len(), 4);

        let tasks = f.coordinator.list_session_tasks(&id).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_without_a_session() {
        let f = fixture(1);
        let err = f
            .coordinator
            .create_session(SessionRequest::new("", "query", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let err = f
            .coordinator
            .create_session(SessionRequest::new("src", "query", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert!(f.store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn planning_failure_persists_failed_session() {
        let f = fixture(1);
        let err = f
            .coordinator
            .create_session(SessionRequest::new("missing", "query", 10))
            .await
            .unwrap_err();
        let DispatchError::Planning { session_id, .. } = err else {
            panic!("expected planning error, got {err:?}");
        };

        let session = f.coordinator.get_session(&session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.status_reason.is_some());
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn cancel_marks_outstanding_tasks_dead() {
        let f = fixture(30);
        let id = submit(&f).await;

        let summary = f.coordinator.cancel_session(&id).await.unwrap();
        assert_eq!(summary.cancelled_task_ids.len(), 3);

        let tasks = f.coordinator.list_session_tasks(&id).await.unwrap();
        assert!(tasks.iter().all(|t| t.is_dead()));
        assert!(tasks
            .iter()
            .all(|t| t.last_error.as_deref() == Some(CANCELLED_REASON)));

        let again = f.coordinator.cancel_session(&id).await.unwrap();
        assert!(again.cancelled_task_ids.is_empty());

        let err = f.coordinator.retry_task(&tasks[0].task_id).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let f = fixture(1);
        assert!(matches!(
            f.coordinator.get_session_status("nope").await.unwrap_err(),
            DispatchError::NotFound { .. }
        ));
        assert!(matches!(
            f.coordinator.get_task_status("nope").await.unwrap_err(),
            DispatchError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn retry_task_only_accepts_dead_tasks() {
        let f = fixture(10);
        let id = submit(&f).await;
        let task = f.coordinator.list_session_tasks(&id).await.unwrap()[0].clone();

        let err = f.coordinator.retry_task(&task.task_id).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_sessions() {
        let f = fixture(10);
        let id = submit(&f).await;

        let now = Utc::now();
        assert!(f
            .coordinator
            .cleanup_expired_sessions(now)
            .await
            .unwrap()
            .is_empty());

        let later = now + chrono::Duration::hours(25);
        let removed = f.coordinator.cleanup_expired_sessions(later).await.unwrap();
        assert_eq!(removed, vec![id.clone()]);
        assert!(f.store.get_session(&id).await.unwrap().is_none());
        assert!(f.store.list_session_tasks(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovery_republishes_pending_tasks() {
        let f = fixture(20);
        let id = submit(&f).await;
        assert_eq!(f.queue.len(), 2);

        let republished = f
            .coordinator
            .recover_stalled_tasks(&id, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(republished.len(), 2);
        assert_eq!(f.queue.len(), 4);
    }
}
