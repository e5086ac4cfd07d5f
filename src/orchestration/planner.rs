//! # Partition Planner
//!
//! Decides how many partitions a source is split into from a narrow
//! pre-scan that reads only the partition key column:
//!
//! ```text
//! partition_count = max(1, floor(distinct_keys / target_partition_size))
//! ```
//!
//! Distinct keys are counted by their 64-bit partition hash, so the count is
//! an estimate that can only undercount on a full hash collision.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::TryStreamExt;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::models::PartitionPlan;
use crate::partitioning::{hash_key, partition_count};
use crate::source::{RecordSource, SourceError};

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("Source unreadable: {0}")]
    SourceUnreadable(#[from] SourceError),

    #[error("Partition key column '{field}' is absent from the source")]
    KeyColumnAbsent { field: String },

    #[error("Target partition size must be at least 1")]
    InvalidTarget,
}

pub struct PartitionPlanner {
    source: Arc<dyn RecordSource>,
}

impl PartitionPlanner {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }

    #[instrument(skip(self))]
    pub async fn plan(
        &self,
        source_ref: &str,
        key_field: &str,
        target_partition_size: u64,
    ) -> Result<PartitionPlan, PlanningError> {
        if target_partition_size == 0 {
            return Err(PlanningError::InvalidTarget);
        }

        if let Some(columns) = self.source.columns(source_ref).await? {
            if !columns.iter().any(|column| column == key_field) {
                return Err(PlanningError::KeyColumnAbsent {
                    field: key_field.to_string(),
                });
            }
        }

        let started = Instant::now();
        let columns = [key_field.to_string()];
        let mut records = self.source.scan(source_ref, Some(&columns)).await?;

        let mut distinct = HashSet::new();
        let mut total_records = 0u64;
        let mut key_seen = false;
        let mut blank_keys = 0u64;

        while let Some(record) = records.try_next().await? {
            total_records += 1;
            key_seen |= record.has_field(key_field);
            match record.key(key_field) {
                Some(key) => {
                    distinct.insert(hash_key(&key));
                }
                None => blank_keys += 1,
            }
        }

        if total_records > 0 && !key_seen {
            return Err(PlanningError::KeyColumnAbsent {
                field: key_field.to_string(),
            });
        }

        let distinct_key_estimate = distinct.len() as u64;
        let plan = PartitionPlan {
            partition_count: partition_count(distinct_key_estimate, target_partition_size),
            distinct_key_estimate,
            total_records,
            scan_duration: started.elapsed(),
        };

        debug!(blank_keys, "Skipped records without a partition key");
        info!(
            partition_count = plan.partition_count,
            distinct_keys = plan.distinct_key_estimate,
            total_records = plan.total_records,
            scan_ms = plan.scan_duration.as_millis() as u64,
            "Planned partitions"
        );
        Ok(plan)
    }
}
