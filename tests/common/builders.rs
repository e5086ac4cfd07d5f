//! Shared fixtures: an in-memory deployment with one coordinator and one
//! worker, plus record generators.

#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::Arc;

use partition_dispatch::config::DispatchConfig;
use partition_dispatch::messaging::InMemoryWorkQueue;
use partition_dispatch::orchestration::BatchCoordinator;
use partition_dispatch::sink::MemorySink;
use partition_dispatch::source::{MemorySource, Record, RecordSource};
use partition_dispatch::store::MemoryStateStore;
use partition_dispatch::transform::{IdentityTransformer, RecordTransformer};
use partition_dispatch::worker::{TaskOutcome, TaskWorker, WorkerContext};
use serde_json::{json, Value};

/// Name under which generated records are registered in the memory source
pub const SOURCE: &str = "queries";
pub const KEY_FIELD: &str = "query_hash";

/// Upper bound on deliveries one `drive` call processes
const MAX_DELIVERIES: usize = 1_000;

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(fields) => Record::new(fields),
        other => panic!("test records must be objects, got {other}"),
    }
}

/// `total` records cycling through `distinct` keys in source order
pub fn keyed_records(total: usize, distinct: usize) -> Vec<Record> {
    (0..total)
        .map(|i| {
            record(json!({
                KEY_FIELD: format!("q{:06}", i % distinct.max(1)),
                "query": format!("SELECT {i}"),
                "seq": i,
            }))
        })
        .collect()
}

pub struct Harness {
    pub config: DispatchConfig,
    pub store: Arc<MemoryStateStore>,
    pub queue: Arc<InMemoryWorkQueue>,
    pub memory_source: Arc<MemorySource>,
    pub sink: Arc<MemorySink>,
    pub coordinator: BatchCoordinator,
    pub worker: TaskWorker,
}

impl Harness {
    /// Run the worker until the session reaches a terminal status or no work
    /// is left, releasing backoff delays whenever the queue looks idle.
    pub async fn drive(&self, session_id: &str) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..MAX_DELIVERIES {
            let session = self
                .coordinator
                .get_session(session_id)
                .await
                .expect("session should exist while driving");
            if session.status.is_terminal() && self.queue.is_empty() {
                break;
            }

            match self.worker.process_next().await.expect("worker step failed") {
                Some(outcome) => outcomes.push(outcome),
                None if self.queue.is_empty() => break,
                None => self.queue.release_all(),
            }
        }
        outcomes
    }

    pub fn failed_outcomes(outcomes: &[TaskOutcome]) -> usize {
        outcomes
            .iter()
            .filter(|outcome| matches!(outcome, TaskOutcome::Failed { .. }))
            .count()
    }
}

pub struct HarnessBuilder {
    config: DispatchConfig,
    records: Vec<Record>,
    source: Option<Arc<dyn RecordSource>>,
    transformer: Arc<dyn RecordTransformer>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let mut config = DispatchConfig::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 4;
        config.store.operation_retries = 3;
        config.store.operation_base_delay_ms = 1;
        config.store.operation_max_delay_ms = 2;
        config.worker.worker_id = Some("test-worker".to_string());
        Self {
            config,
            records: Vec::new(),
            source: None,
            transformer: Arc::new(IdentityTransformer),
        }
    }

    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn RecordTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.retry.max_retries = max_retries;
        self
    }

    pub fn with_flush_threshold(mut self, flush_threshold: usize) -> Self {
        self.config.worker.flush_threshold = flush_threshold;
        self
    }

    pub fn with_stop_on_first_error(mut self) -> Self {
        self.config.worker.stop_on_first_error = true;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(MemoryStateStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new(self.config.queue.queue_name.clone()));
        let memory_source = Arc::new(MemorySource::new());
        memory_source.insert(SOURCE, self.records);
        let sink = Arc::new(MemorySink::new());

        let source: Arc<dyn RecordSource> = match self.source {
            Some(source) => source,
            None => memory_source.clone(),
        };

        let coordinator = BatchCoordinator::new(
            self.config.clone(),
            store.clone(),
            queue.clone(),
            source.clone(),
        );
        let context = WorkerContext::new(
            &self.config,
            store.clone(),
            queue.clone(),
            source,
            sink.clone(),
            self.transformer,
        );
        let worker = TaskWorker::new(
            self.config.worker.resolve_worker_id(),
            self.config.worker.clone(),
            context,
        );

        Harness {
            config: self.config,
            store,
            queue,
            memory_source,
            sink,
            coordinator,
            worker,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
