mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use partition_dispatch::config::DispatchConfig;
use partition_dispatch::messaging::InMemoryWorkQueue;
use partition_dispatch::models::{Session, SessionRequest, Task};
use partition_dispatch::orchestration::BatchCoordinator;
use partition_dispatch::sink::MemorySink;
use partition_dispatch::source::MemorySource;
use partition_dispatch::state_machine::{SessionStatus, TaskStatus};
use partition_dispatch::store::{MemoryStateStore, StateStore};
use partition_dispatch::transform::IdentityTransformer;
use partition_dispatch::worker::{SkipReason, TaskOutcome, TaskWorker, WorkerContext};
use partition_dispatch::{DispatchError, DispatchResult};

/// Memory store that fails the first session read after any task is written
/// as `completed`.
struct BlipAfterCompletion {
    inner: MemoryStateStore,
    armed: AtomicBool,
}

impl BlipAfterCompletion {
    fn new() -> Self {
        Self {
            inner: MemoryStateStore::new(),
            armed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StateStore for BlipAfterCompletion {
    async fn create_session(&self, session: &Session) -> DispatchResult<bool> {
        self.inner.create_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> DispatchResult<Option<Session>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            return Err(DispatchError::StateStoreUnavailable("blip".into()));
        }
        self.inner.get_session(session_id).await
    }

    async fn compare_and_swap_session(
        &self,
        expected: SessionStatus,
        next: &Session,
    ) -> DispatchResult<bool> {
        self.inner.compare_and_swap_session(expected, next).await
    }

    async fn list_sessions(&self) -> DispatchResult<Vec<Session>> {
        self.inner.list_sessions().await
    }

    async fn delete_session(&self, session_id: &str) -> DispatchResult<bool> {
        self.inner.delete_session(session_id).await
    }

    async fn create_task(&self, task: &Task) -> DispatchResult<bool> {
        self.inner.create_task(task).await
    }

    async fn get_task(&self, task_id: &str) -> DispatchResult<Option<Task>> {
        self.inner.get_task(task_id).await
    }

    async fn list_session_tasks(&self, session_id: &str) -> DispatchResult<Vec<Task>> {
        self.inner.list_session_tasks(session_id).await
    }

    async fn task_ids_with_status(
        &self,
        session_id: &str,
        status: TaskStatus,
    ) -> DispatchResult<Vec<String>> {
        self.inner.task_ids_with_status(session_id, status).await
    }

    async fn dead_task_ids(&self, session_id: &str) -> DispatchResult<Vec<String>> {
        self.inner.dead_task_ids(session_id).await
    }

    async fn compare_and_swap_task(
        &self,
        expected: &Task,
        next: &Task,
    ) -> DispatchResult<Option<Task>> {
        let swapped = self.inner.compare_and_swap_task(expected, next).await?;
        if swapped
            .as_ref()
            .is_some_and(|task| task.status == TaskStatus::Completed)
        {
            self.armed.store(true, Ordering::SeqCst);
        }
        Ok(swapped)
    }
}

struct Deployment {
    store: Arc<BlipAfterCompletion>,
    queue: Arc<InMemoryWorkQueue>,
    coordinator: BatchCoordinator,
    worker: TaskWorker,
}

fn deployment(store_retries: u32) -> Deployment {
    let mut config = DispatchConfig::default();
    config.store.operation_retries = store_retries;
    config.store.operation_base_delay_ms = 1;
    config.store.operation_max_delay_ms = 2;

    let store = Arc::new(BlipAfterCompletion::new());
    let queue = Arc::new(InMemoryWorkQueue::new("finalize"));
    let source = Arc::new(MemorySource::new());
    source.insert(SOURCE, keyed_records(60, 12));

    let coordinator =
        BatchCoordinator::new(config.clone(), store.clone(), queue.clone(), source.clone());
    let context = WorkerContext::new(
        &config,
        store.clone(),
        queue.clone(),
        source,
        Arc::new(MemorySink::new()),
        Arc::new(IdentityTransformer),
    );
    let worker = TaskWorker::new("finalize-worker", config.worker.clone(), context);
    Deployment {
        store,
        queue,
        coordinator,
        worker,
    }
}

async fn single_task_session(deployment: &Deployment) -> String {
    deployment
        .coordinator
        .create_session(SessionRequest::new(SOURCE, KEY_FIELD, 100))
        .await
        .unwrap()
}

#[tokio::test]
async fn store_blip_after_completion_is_retried() {
    let deployment = deployment(5);
    let session_id = single_task_session(&deployment).await;

    let outcome = deployment.worker.process_next().await.unwrap();
    assert!(matches!(outcome, Some(TaskOutcome::Completed(_))));
    assert!(deployment.queue.is_empty());

    let session = deployment.coordinator.get_session(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.finished_at.is_some());
}

#[tokio::test]
async fn redelivery_of_completed_task_finalizes_session() {
    let deployment = deployment(0);
    let session_id = single_task_session(&deployment).await;

    let err = deployment.worker.process_next().await.unwrap_err();
    assert!(err.is_transient());
    let session = deployment.store.inner.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Running);

    // The unacknowledged delivery comes back
    deployment.queue.release_all();
    let outcome = deployment.worker.process_next().await.unwrap();
    assert_eq!(
        outcome,
        Some(TaskOutcome::Skipped(SkipReason::AlreadyCompleted))
    );
    assert!(deployment.queue.is_empty());

    let session = deployment.coordinator.get_session(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.finished_at.is_some());
}

#[tokio::test]
async fn recovery_finalizes_a_settled_session() {
    let deployment = deployment(0);
    let session_id = single_task_session(&deployment).await;
    deployment.worker.process_next().await.unwrap_err();

    let republished = deployment
        .coordinator
        .recover_stalled_tasks(&session_id, std::time::Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(republished.is_empty());

    let progress = deployment
        .coordinator
        .get_session_status(&session_id)
        .await
        .unwrap();
    assert_eq!(progress.status, SessionStatus::Completed);
    assert_eq!(progress.completed, 1);
}
