//! In-process worker slots.
//!
//! Each slot is an independent [`TaskWorker`] with its own id and a prefetch
//! of one; slots share only the store, queue, and collaborators.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use super::executor::{TaskWorker, WorkerContext, WorkerStats};
use crate::config::WorkerConfig;

pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    workers: JoinSet<WorkerStats>,
    worker_ids: Vec<String>,
}

impl WorkerPool {
    /// Spawn `config.concurrency` workers (at least one) on the current runtime
    pub fn start(config: &WorkerConfig, context: WorkerContext) -> Self {
        let (shutdown, receiver) = watch::channel(false);
        let base_id = config.resolve_worker_id();
        let slots = config.concurrency.max(1);

        let mut workers = JoinSet::new();
        let mut worker_ids = Vec::with_capacity(slots);
        for slot in 0..slots {
            let worker_id = if slots == 1 {
                base_id.clone()
            } else {
                format!("{base_id}-{slot}")
            };
            let worker = Arc::new(TaskWorker::new(
                worker_id.clone(),
                config.clone(),
                context.clone(),
            ));
            let receiver = receiver.clone();
            workers.spawn(async move { worker.run(receiver).await });
            worker_ids.push(worker_id);
        }

        info!(workers = slots, base_id = %base_id, "Worker pool started");
        Self {
            shutdown,
            workers,
            worker_ids,
        }
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Signal every worker to stop after its current task and collect stats
    pub async fn shutdown(mut self) -> Vec<WorkerStats> {
        // Err only when every receiver is gone, i.e. all workers already exited.
        let _ = self.shutdown.send(true);

        let mut stats = Vec::with_capacity(self.worker_ids.len());
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(worker_stats) => stats.push(worker_stats),
                Err(e) => error!(error = %e, "Worker task panicked or was aborted"),
            }
        }
        info!(workers = stats.len(), "Worker pool stopped");
        stats
    }
}
