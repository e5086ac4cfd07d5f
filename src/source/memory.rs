//! # In-Memory Source

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};

use super::traits::{Record, RecordSource, RecordStream, SourceError};

/// Named in-memory datasets
#[derive(Debug, Default)]
pub struct MemorySource {
    datasets: DashMap<String, Arc<Vec<Record>>>,
    schemas: DashMap<String, Vec<String>>,
    failing_scans: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source_ref: impl Into<String>, records: Vec<Record>) {
        self.datasets.insert(source_ref.into(), Arc::new(records));
    }

    /// Declare a schema so narrow scans can reject unknown key columns
    pub fn with_schema(&self, source_ref: impl Into<String>, columns: Vec<String>) {
        self.schemas.insert(source_ref.into(), columns);
    }

    /// Fail the next `scans` calls as unavailable
    pub fn fail_next_scans(&self, scans: usize) {
        self.failing_scans.store(scans, Ordering::SeqCst);
    }

    pub fn scans_left_to_fail(&self) -> usize {
        self.failing_scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn scan(
        &self,
        source_ref: &str,
        columns: Option<&[String]>,
    ) -> Result<RecordStream, SourceError> {
        let failing = self
            .failing_scans
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::unavailable(source_ref, "simulated outage"));
        }

        let records = self
            .datasets
            .get(source_ref)
            .map(|records| Arc::clone(&records))
            .ok_or_else(|| SourceError::unavailable(source_ref, "no such dataset"))?;
        let columns = columns.map(<[String]>::to_vec);

        let stream = stream::iter(0..records.len()).map(move |i| {
            let record = &records[i];
            Ok(match &columns {
                Some(columns) => record.project(columns),
                None => record.clone(),
            })
        });
        Ok(stream.boxed())
    }

    async fn columns(&self, source_ref: &str) -> Result<Option<Vec<String>>, SourceError> {
        Ok(self.schemas.get(source_ref).map(|columns| columns.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    fn records() -> Vec<Record> {
        (0..3)
            .map(|i| match json!({"id": i, "query": format!("q{i}")}) {
                serde_json::Value::Object(fields) => Record::new(fields),
                _ => unreachable!(),
            })
            .collect()
    }

    #[tokio::test]
    async fn scan_streams_in_order_and_projects() {
        let source = MemorySource::new();
        source.insert("queries", records());

        let all: Vec<Record> = source
            .scan("queries", None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].key("query").as_deref(), Some("q2"));

        let narrow: Vec<Record> = source
            .scan("queries", Some(&["query".to_string()]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(!narrow[0].has_field("id"));
    }

    #[tokio::test]
    async fn unknown_dataset_and_injected_failures() {
        let source = MemorySource::new();
        assert!(source.scan("missing", None).await.is_err());

        source.insert("queries", records());
        source.fail_next_scans(1);
        assert!(source.scan("queries", None).await.is_err());
        assert!(source.scan("queries", None).await.is_ok());
    }
}
