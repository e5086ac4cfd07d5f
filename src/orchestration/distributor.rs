//! # Task Distributor
//!
//! Materialises one task per remainder and publishes its work item. Task ids
//! are derived from `(session_id, remainder)` and creation never overwrites,
//! so re-running distribution for a session cannot duplicate tasks.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::error::{DispatchError, DispatchResult};
use crate::logging::log_task_operation;
use crate::messaging::WorkQueue;
use crate::models::{Session, Task, WorkItem};
use crate::resilience::RetryPolicy;
use crate::state_machine::TaskStatus;
use crate::store::StateStore;

pub struct TaskDistributor {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn WorkQueue>,
    retry: RetryPolicy,
}

impl TaskDistributor {
    pub fn new(store: Arc<dyn StateStore>, queue: Arc<dyn WorkQueue>, retry: RetryPolicy) -> Self {
        Self {
            store,
            queue,
            retry,
        }
    }

    /// Create and publish every task of `session`, returning the task ids in
    /// remainder order.
    ///
    /// Existing tasks are left untouched; those still `pending` are
    /// republished, which covers a crash between creation and publication.
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub async fn distribute(
        &self,
        session: &Session,
        partition_count: u32,
    ) -> DispatchResult<Vec<String>> {
        let mut task_ids = Vec::with_capacity(partition_count as usize);
        let mut created = 0u32;

        for remainder in 0..partition_count {
            let fresh = Task::new(
                &session.session_id,
                remainder,
                partition_count,
                session.max_retries,
                Utc::now(),
            );

            let store = &self.store;
            let task = &fresh;
            let inserted = self
                .retry
                .run("create_task", move || store.create_task(task))
                .await
                .map_err(|e| distribution_error(session, e))?;

            let publish = if inserted {
                created += 1;
                Some(fresh.clone())
            } else {
                let existing = self
                    .retry
                    .run("get_task", move || store.get_task(&task.task_id))
                    .await
                    .map_err(|e| distribution_error(session, e))?;
                existing.filter(|task| task.status == TaskStatus::Pending)
            };

            if let Some(task) = publish {
                self.publish(session, &task).await?;
                if inserted {
                    log_task_operation(
                        "distribute",
                        &session.session_id,
                        &task.task_id,
                        Some(remainder),
                        task.status.as_str(),
                        None,
                    );
                } else {
                    debug!(task_id = %task.task_id, "Republished existing pending task");
                }
            }
            task_ids.push(fresh.task_id);
        }

        info!(
            partition_count,
            created,
            existing = partition_count - created,
            "Distributed session tasks"
        );
        Ok(task_ids)
    }

    /// Publish the work item for one task
    pub async fn publish(&self, session: &Session, task: &Task) -> DispatchResult<()> {
        let item = WorkItem::for_task(session, task);
        let queue = &self.queue;
        let item = &item;
        self.retry
            .run("enqueue", move || queue.enqueue(item))
            .await
            .map_err(|e| distribution_error(session, e))?;
        Ok(())
    }
}

fn distribution_error(session: &Session, error: DispatchError) -> DispatchError {
    DispatchError::Distribution {
        session_id: session.session_id.clone(),
        reason: error.to_string(),
    }
}
