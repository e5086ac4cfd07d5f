//! # In-Memory Sink

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{OutputRecord, RecordSink, SinkError};

#[derive(Debug, Default)]
pub struct MemorySink {
    rows: DashMap<(String, String), OutputRecord>,
    batches: AtomicU64,
    writes: AtomicU64,
    failing_batches: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `batches` upserts as unavailable
    pub fn fail_next_batches(&self, batches: usize) {
        self.failing_batches.store(batches, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stored rows of a session keyed by record id
    pub fn snapshot(&self, session_id: &str) -> BTreeMap<String, OutputRecord> {
        self.rows
            .iter()
            .filter(|row| row.key().0 == session_id)
            .map(|row| (row.key().1.clone(), row.value().clone()))
            .collect()
    }

    /// Successful upsert calls so far
    pub fn batches_written(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    /// Rows written so far, rewrites included
    pub fn rows_written(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert_batch(&self, records: &[OutputRecord]) -> Result<(), SinkError> {
        let failing = self
            .failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError::Unavailable("simulated outage".to_string()));
        }

        for record in records {
            self.rows.insert(
                (record.session_id.clone(), record.record_id.clone()),
                record.clone(),
            );
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.writes.fetch_add(records.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::OutputStatus;

    fn row(record_id: &str, payload: i64) -> OutputRecord {
        OutputRecord {
            session_id: "s1".into(),
            record_id: record_id.into(),
            remainder: 0,
            status: OutputStatus::Succeeded,
            payload: Some(serde_json::json!(payload)),
            error: None,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_identity() {
        let sink = MemorySink::new();
        sink.upsert_batch(&[row("a", 1), row("b", 1)]).await.unwrap();
        sink.upsert_batch(&[row("a", 2)]).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.rows_written(), 3);
        assert_eq!(
            sink.snapshot("s1")["a"].payload,
            Some(serde_json::json!(2))
        );
    }

    #[tokio::test]
    async fn injected_failure_writes_nothing() {
        let sink = MemorySink::new();
        sink.fail_next_batches(1);
        assert!(sink.upsert_batch(&[row("a", 1)]).await.is_err());
        assert!(sink.is_empty());
        assert!(sink.upsert_batch(&[row("a", 1)]).await.is_ok());
    }
}
