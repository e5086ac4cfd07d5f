//! # Retry Supervisor
//!
//! Runs whenever a task lands in `failed`. The order of checks is fixed:
//!
//! 1. A cancelled session never retries; the task is marked dead.
//! 2. With budget left the task goes back to `pending` (retry count + 1) and
//!    its work item is republished with a backoff delay held by the queue.
//! 3. Otherwise the task is dead-lettered and waits for manual resubmission.
//!
//! The `pending` transition is persisted before the delayed publish. A crash
//! between the two leaves a pending task without a queued item, which stalled
//! task recovery republishes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::backoff::BackoffCalculator;
use crate::error::{DispatchError, DispatchResult};
use crate::logging::log_task_operation;
use crate::messaging::WorkQueue;
use crate::models::{Task, WorkItem};
use crate::resilience::RetryPolicy;
use crate::state_machine::{TaskEvent, TaskStateMachine};
use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    Requeued { retry_count: u32, delay_ms: u64 },
    DeadLettered { retry_count: u32 },
    /// Session cancelled; no retry scheduled
    Cancelled,
    /// Another writer changed the task first; nothing was done
    Superseded,
}

impl RetryDecision {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DeadLettered { .. } | Self::Cancelled)
    }
}

pub struct RetrySupervisor {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn WorkQueue>,
    backoff: BackoffCalculator,
    retry: RetryPolicy,
}

impl RetrySupervisor {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        backoff: BackoffCalculator,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            backoff,
            retry,
        }
    }

    pub fn backoff(&self) -> &BackoffCalculator {
        &self.backoff
    }

    /// Decide what happens to a task that has just failed
    #[instrument(skip(self, failed), fields(task_id = %failed.task_id, retry_count = failed.retry_count))]
    pub async fn handle_failure(&self, failed: &Task) -> DispatchResult<RetryDecision> {
        let store = &self.store;
        let session = self
            .retry
            .run("get_session", move || store.get_session(&failed.session_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("session", &failed.session_id))?;

        if session.is_cancelled() {
            if failed.is_dead() {
                return Ok(RetryDecision::Cancelled);
            }
            let next = TaskStateMachine::apply(failed, TaskEvent::Cancel, Utc::now())?;
            return Ok(match self.swap(failed, &next).await? {
                Some(_) => {
                    log_task_operation(
                        "retry_suppressed",
                        &failed.session_id,
                        &failed.task_id,
                        Some(failed.remainder),
                        next.status.as_str(),
                        Some("session cancelled"),
                    );
                    RetryDecision::Cancelled
                }
                None => RetryDecision::Superseded,
            });
        }

        if failed.can_retry() {
            let delay = self.backoff.delay_for(failed.retry_count);
            let next = TaskStateMachine::apply(failed, TaskEvent::Requeue, Utc::now())?;
            let Some(requeued) = self.swap(failed, &next).await? else {
                return Ok(RetryDecision::Superseded);
            };

            let item = WorkItem::for_task(&session, &requeued);
            self.publish_delayed(&item, delay).await?;

            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            info!(
                task_id = %requeued.task_id,
                retry_count = requeued.retry_count,
                max_retries = requeued.max_retries,
                delay_ms,
                "Requeued failed task with backoff"
            );
            return Ok(RetryDecision::Requeued {
                retry_count: requeued.retry_count,
                delay_ms,
            });
        }

        let next = TaskStateMachine::apply(failed, TaskEvent::DeadLetter, Utc::now())?;
        match self.swap(failed, &next).await? {
            Some(dead) => {
                warn!(
                    task_id = %dead.task_id,
                    retry_count = dead.retry_count,
                    last_error = dead.last_error.as_deref().unwrap_or(""),
                    "Retries exhausted, task dead-lettered"
                );
                log_task_operation(
                    "dead_letter",
                    &dead.session_id,
                    &dead.task_id,
                    Some(dead.remainder),
                    dead.status.as_str(),
                    dead.last_error.as_deref(),
                );
                Ok(RetryDecision::DeadLettered {
                    retry_count: dead.retry_count,
                })
            }
            None => Ok(RetryDecision::Superseded),
        }
    }

    async fn swap(&self, expected: &Task, next: &Task) -> DispatchResult<Option<Task>> {
        let store = &self.store;
        self.retry
            .run("compare_and_swap_task", move || {
                store.compare_and_swap_task(expected, next)
            })
            .await
    }

    async fn publish_delayed(&self, item: &WorkItem, delay: Duration) -> DispatchResult<()> {
        let queue = &self.queue;
        self.retry
            .run("enqueue_delayed", move || queue.enqueue_delayed(item, delay))
            .await?;
        Ok(())
    }
}
