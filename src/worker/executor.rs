//! # Task Worker
//!
//! Executes one work item at a time:
//!
//! 1. Claim the task (`pending → processing`, or take over a stale claim).
//! 2. Scan the full source, keeping records whose key hashes to the task's
//!    remainder.
//! 3. Buffer matches by key and flush transformed batches to the sink once
//!    the flush threshold is reached.
//! 4. Report `completed` with a result summary, or `failed` with the error and
//!    hand the task to the retry supervisor.
//!
//! Deliveries are at-least-once. Stale, finished, or cancelled deliveries
//! are acknowledged without running; a delivery for a task another worker is
//! still inside its visibility window for is left unacknowledged.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::buffer::BatchBuffer;
use crate::config::{DispatchConfig, WorkerConfig};
use crate::error::{DispatchResult, TaskExecutionError};
use crate::logging::log_task_operation;
use crate::messaging::WorkQueue;
use crate::models::{RecordFailure, Session, Task, TaskResult, WorkItem};
use crate::orchestration::backoff::{BackoffCalculator, BackoffCalculatorConfig};
use crate::orchestration::{RetryDecision, RetrySupervisor, SessionFinalizer};
use crate::partitioning::{belongs_to, hash_key};
use crate::resilience::RetryPolicy;
use crate::sink::{OutputRecord, OutputStatus, RecordSink};
use crate::source::RecordSource;
use crate::state_machine::{TaskEvent, TaskStateMachine, TaskStatus};
use crate::store::StateStore;
use crate::transform::{RecordTransformer, TransformContext};

/// Shared collaborators of every worker slot in a process
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub source: Arc<dyn RecordSource>,
    pub sink: Arc<dyn RecordSink>,
    pub transformer: Arc<dyn RecordTransformer>,
    pub supervisor: Arc<RetrySupervisor>,
    pub finalizer: Arc<SessionFinalizer>,
    pub retry: RetryPolicy,
}

impl WorkerContext {
    pub fn new(
        config: &DispatchConfig,
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn RecordSink>,
        transformer: Arc<dyn RecordTransformer>,
    ) -> Self {
        let retry = RetryPolicy::from(&config.store);
        let backoff = BackoffCalculator::new(BackoffCalculatorConfig::from(&config.retry));
        Self {
            supervisor: Arc::new(RetrySupervisor::new(
                store.clone(),
                queue.clone(),
                backoff,
                retry.clone(),
            )),
            finalizer: Arc::new(SessionFinalizer::new(store.clone(), retry.clone())),
            store,
            queue,
            source,
            sink,
            transformer,
            retry,
        }
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("queue", &self.queue.queue_name())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Why a delivery was acknowledged without running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Session or task no longer exists
    Missing,
    /// Delivery from an earlier attempt
    Stale,
    AlreadyCompleted,
    Dead,
    SessionCancelled,
    /// Another writer changed the task first
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(TaskResult),
    Failed {
        error: String,
        decision: RetryDecision,
    },
    Skipped(SkipReason),
    /// Task is held by a live claim; the delivery stays unacknowledged
    Deferred,
}

/// Per-worker counters returned when the run loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub errors: u64,
}

impl WorkerStats {
    pub fn record(&mut self, outcome: &TaskOutcome) {
        self.processed += 1;
        match outcome {
            TaskOutcome::Completed(_) => self.completed += 1,
            TaskOutcome::Failed { .. } => self.failed += 1,
            TaskOutcome::Skipped(_) => self.skipped += 1,
            TaskOutcome::Deferred => self.deferred += 1,
        }
    }
}

pub struct TaskWorker {
    worker_id: String,
    config: WorkerConfig,
    context: WorkerContext,
}

impl TaskWorker {
    pub fn new(worker_id: impl Into<String>, config: WorkerConfig, context: WorkerContext) -> Self {
        Self {
            worker_id: worker_id.into(),
            config,
            context,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Receive and execute at most one work item. `None` means the queue had
    /// nothing visible.
    ///
    /// The delivery is acknowledged for every outcome except `Deferred`. On
    /// error it is left to reappear after its visibility timeout.
    pub async fn process_next(&self) -> DispatchResult<Option<TaskOutcome>> {
        let queue = &self.context.queue;
        let visibility = self.config.visibility_timeout();
        let Some(delivery) = self
            .context
            .retry
            .run("receive", move || queue.receive(visibility))
            .await?
        else {
            return Ok(None);
        };

        if delivery.is_redelivery() {
            debug!(
                task_id = %delivery.item.task_id,
                receive_count = delivery.receive_count,
                "Redelivered work item"
            );
        }

        let outcome = self.execute(&delivery.item).await?;
        if !matches!(outcome, TaskOutcome::Deferred) {
            let receipt = &delivery.receipt;
            if let Err(e) = self
                .context
                .retry
                .run("ack", move || queue.ack(receipt))
                .await
            {
                warn!(receipt = %receipt, error = %e, "Failed to acknowledge work item");
            }
        }
        Ok(Some(outcome))
    }

    /// Poll the queue until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!(worker_id = %self.worker_id, queue = self.context.queue.queue_name(), "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_next().await {
                Ok(Some(outcome)) => {
                    stats.record(&outcome);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    stats.errors += 1;
                    error!(worker_id = %self.worker_id, error = %e, "Work item processing failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(
            worker_id = %self.worker_id,
            processed = stats.processed,
            completed = stats.completed,
            failed = stats.failed,
            "Worker stopped"
        );
        stats
    }

    /// Run the claim protocol and, if claimed, the partition itself
    #[instrument(skip(self, item), fields(worker_id = %self.worker_id, task_id = %item.task_id, remainder = item.remainder))]
    pub async fn execute(&self, item: &WorkItem) -> DispatchResult<TaskOutcome> {
        let Some(session) = self.load_session(&item.session_id).await? else {
            return Ok(TaskOutcome::Skipped(SkipReason::Missing));
        };
        if session.is_cancelled() {
            return Ok(TaskOutcome::Skipped(SkipReason::SessionCancelled));
        }
        let Some(task) = self.load_task(&item.task_id).await? else {
            return Ok(TaskOutcome::Skipped(SkipReason::Missing));
        };
        if item.attempt < task.retry_count {
            debug!(
                attempt = item.attempt,
                retry_count = task.retry_count,
                "Dropping delivery from an earlier attempt"
            );
            return Ok(TaskOutcome::Skipped(SkipReason::Stale));
        }

        let event = match task.status {
            // The run that settled this task may have died before finalizing.
            TaskStatus::Completed => {
                return self.settled(&task, SkipReason::AlreadyCompleted).await;
            }
            TaskStatus::Failed if task.is_dead() => {
                return self.settled(&task, SkipReason::Dead).await;
            }
            // A worker failed the task but never reached the supervisor.
            TaskStatus::Failed => return self.resume_failure(&task).await,
            TaskStatus::Pending => TaskEvent::Claim {
                worker_id: self.worker_id.clone(),
            },
            TaskStatus::Processing
                if task.claim_is_stale(Utc::now(), self.config.visibility_timeout()) =>
            {
                warn!(
                    previous_worker = task.worker_id.as_deref().unwrap_or("unknown"),
                    "Taking over stale claim"
                );
                TaskEvent::Reclaim {
                    worker_id: self.worker_id.clone(),
                }
            }
            TaskStatus::Processing => {
                debug!(
                    owner = task.worker_id.as_deref().unwrap_or("unknown"),
                    "Task is claimed by a live worker, deferring"
                );
                return Ok(TaskOutcome::Deferred);
            }
        };

        let next = TaskStateMachine::apply(&task, event, Utc::now())?;
        let Some(claimed) = self.swap(&task, &next).await? else {
            return Ok(TaskOutcome::Skipped(SkipReason::Superseded));
        };
        log_task_operation(
            "claim",
            &claimed.session_id,
            &claimed.task_id,
            Some(claimed.remainder),
            claimed.status.as_str(),
            Some(self.worker_id.as_str()),
        );

        let run = tokio::time::timeout(
            self.config.task_timeout(),
            self.run_partition(item, &session),
        )
        .await
        .unwrap_or(Err(TaskExecutionError::Timeout {
            after_ms: self.config.task_timeout_ms,
        }));

        let outcome = match run {
            Ok(result) => self.complete(&claimed, result).await?,
            Err(error) => self.fail(&claimed, error).await?,
        };
        self.context.finalizer.finalize(&item.session_id).await?;
        Ok(outcome)
    }

    async fn settled(&self, task: &Task, reason: SkipReason) -> DispatchResult<TaskOutcome> {
        self.context.finalizer.finalize(&task.session_id).await?;
        Ok(TaskOutcome::Skipped(reason))
    }

    async fn run_partition(
        &self,
        item: &WorkItem,
        session: &Session,
    ) -> Result<TaskResult, TaskExecutionError> {
        let started = Instant::now();
        let context = TransformContext {
            session_id: session.session_id.clone(),
            from_format: item.from_format.clone(),
            to_format: item.to_format.clone(),
        };

        let mut records = self
            .context
            .source
            .scan(&item.source_ref, None)
            .await
            .map_err(|e| TaskExecutionError::SourceUnavailable(e.to_string()))?;

        let mut buffer = BatchBuffer::new(self.config.flush_threshold);
        let mut unique = HashSet::new();
        let mut result = TaskResult::default();

        while let Some(record) = records
            .try_next()
            .await
            .map_err(|e| TaskExecutionError::SourceUnavailable(e.to_string()))?
        {
            result.records_scanned += 1;
            let Some(key) = record.key(&item.key_field) else {
                result.skipped += 1;
                continue;
            };
            if !belongs_to(&key, item.remainder, item.total_partitions) {
                continue;
            }

            result.records_matched += 1;
            unique.insert(hash_key(&key));
            if buffer.insert(key, record) {
                self.flush(&mut buffer, item, &context, &mut result).await?;
            }
        }
        if !buffer.is_empty() {
            self.flush(&mut buffer, item, &context, &mut result).await?;
        }

        let elapsed = started.elapsed();
        result.unique_records = unique.len() as u64;
        result.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        result.records_per_second = if elapsed.as_secs_f64() > 0.0 {
            result.records_matched as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        Ok(result)
    }

    /// Transform and write one batch. Record-level transform errors become
    /// failed output rows unless `stop_on_first_error` is set.
    async fn flush(
        &self,
        buffer: &mut BatchBuffer,
        item: &WorkItem,
        context: &TransformContext,
        result: &mut TaskResult,
    ) -> Result<(), TaskExecutionError> {
        let batch = buffer.drain();
        let mut outputs = Vec::with_capacity(batch.len());
        let mut failed = 0u64;

        for (record_id, record) in batch {
            let output = match self.context.transformer.transform(&record, context) {
                Ok(transformed) => OutputRecord {
                    session_id: item.session_id.clone(),
                    record_id,
                    remainder: item.remainder,
                    status: OutputStatus::Succeeded,
                    payload: Some(transformed.into_value()),
                    error: None,
                },
                Err(e) if self.config.stop_on_first_error => {
                    return Err(TaskExecutionError::TransformAborted {
                        record_id,
                        reason: e.message,
                    });
                }
                Err(e) => {
                    failed += 1;
                    if result.record_failures.len() < self.config.max_reported_failures {
                        result.record_failures.push(RecordFailure {
                            record_id: record_id.clone(),
                            error: e.message.clone(),
                        });
                    }
                    OutputRecord {
                        session_id: item.session_id.clone(),
                        record_id,
                        remainder: item.remainder,
                        status: OutputStatus::Failed,
                        payload: None,
                        error: Some(e.message),
                    }
                }
            };
            outputs.push(output);
        }

        self.context
            .sink
            .upsert_batch(&outputs)
            .await
            .map_err(|e| TaskExecutionError::SinkUnavailable(e.to_string()))?;

        result.failed += failed;
        result.succeeded += outputs.len() as u64 - failed;
        result.flushes += 1;
        debug!(
            task_id = %item.task_id,
            rows = outputs.len(),
            flushes = result.flushes,
            "Flushed batch"
        );

        if self.session_cancelled(&item.session_id).await {
            return Err(TaskExecutionError::Cancelled);
        }
        Ok(())
    }

    async fn complete(&self, claimed: &Task, result: TaskResult) -> DispatchResult<TaskOutcome> {
        let next = TaskStateMachine::apply(
            claimed,
            TaskEvent::Complete {
                result: result.clone(),
            },
            Utc::now(),
        )?;
        let Some(done) = self.swap(claimed, &next).await? else {
            warn!(task_id = %claimed.task_id, "Task changed while running; result not recorded");
            return Ok(TaskOutcome::Skipped(SkipReason::Superseded));
        };

        info!(
            task_id = %done.task_id,
            remainder = done.remainder,
            records_matched = result.records_matched,
            succeeded = result.succeeded,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "Task completed"
        );
        log_task_operation(
            "complete",
            &done.session_id,
            &done.task_id,
            Some(done.remainder),
            done.status.as_str(),
            None,
        );
        Ok(TaskOutcome::Completed(result))
    }

    async fn fail(&self, claimed: &Task, error: TaskExecutionError) -> DispatchResult<TaskOutcome> {
        let message = error.to_string();
        let next = TaskStateMachine::apply(
            claimed,
            TaskEvent::Fail {
                error: message.clone(),
            },
            Utc::now(),
        )?;
        let Some(failed) = self.swap(claimed, &next).await? else {
            return Ok(TaskOutcome::Skipped(SkipReason::Superseded));
        };

        error!(
            task_id = %failed.task_id,
            retry_count = failed.retry_count,
            error = %message,
            "Task failed"
        );
        log_task_operation(
            "fail",
            &failed.session_id,
            &failed.task_id,
            Some(failed.remainder),
            failed.status.as_str(),
            Some(&message),
        );

        let decision = self.context.supervisor.handle_failure(&failed).await?;
        Ok(TaskOutcome::Failed {
            error: message,
            decision,
        })
    }

    async fn resume_failure(&self, task: &Task) -> DispatchResult<TaskOutcome> {
        let decision = self.context.supervisor.handle_failure(task).await?;
        self.context.finalizer.finalize(&task.session_id).await?;
        Ok(TaskOutcome::Failed {
            error: task.last_error.clone().unwrap_or_default(),
            decision,
        })
    }

    /// Best-effort cancel check between flushes; a store error means "keep going"
    async fn session_cancelled(&self, session_id: &str) -> bool {
        match self.context.store.get_session(session_id).await {
            Ok(Some(session)) => session.is_cancelled(),
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "Cancel check skipped");
                false
            }
        }
    }

    async fn load_session(&self, session_id: &str) -> DispatchResult<Option<Session>> {
        let store = &self.context.store;
        self.context
            .retry
            .run("get_session", move || store.get_session(session_id))
            .await
    }

    async fn load_task(&self, task_id: &str) -> DispatchResult<Option<Task>> {
        let store = &self.context.store;
        self.context
            .retry
            .run("get_task", move || store.get_task(task_id))
            .await
    }

    async fn swap(&self, expected: &Task, next: &Task) -> DispatchResult<Option<Task>> {
        let store = &self.context.store;
        self.context
            .retry
            .run("compare_and_swap_task", move || {
                store.compare_and_swap_task(expected, next)
            })
            .await
    }
}
