//! # Session Model
//!
//! One logical batch of work over one data source.

use crate::state_machine::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Submission parameters for a new session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub source_ref: String,
    pub partition_key_field: String,
    /// Desired unique items per task
    pub target_partition_size: u64,
    pub from_format: String,
    pub to_format: String,
    /// Overrides the configured retry budget for this session
    pub max_retries: Option<u32>,
}

impl SessionRequest {
    pub fn new(
        source_ref: impl Into<String>,
        partition_key_field: impl Into<String>,
        target_partition_size: u64,
    ) -> Self {
        Self {
            source_ref: source_ref.into(),
            partition_key_field: partition_key_field.into(),
            target_partition_size,
            from_format: String::new(),
            to_format: String::new(),
            max_retries: None,
        }
    }

    pub fn with_formats(mut self, from_format: impl Into<String>, to_format: impl Into<String>) -> Self {
        self.from_format = from_format.into();
        self.to_format = to_format.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Persisted session record (`session:{id}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub source_ref: String,
    pub partition_key_field: String,
    pub target_partition_size: u64,
    pub from_format: String,
    pub to_format: String,
    pub max_retries: u32,
    pub status: SessionStatus,
    /// Why the session failed, or other operator-facing context
    pub status_reason: Option<String>,
    pub plan: Option<PlanSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(request: &SessionRequest, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Self::generate_id(),
            source_ref: request.source_ref.clone(),
            partition_key_field: request.partition_key_field.clone(),
            target_partition_size: request.target_partition_size,
            from_format: request.from_format.clone(),
            to_format: request.to_format.clone(),
            max_retries: request.max_retries.unwrap_or(max_retries),
            status: SessionStatus::Created,
            status_reason: None,
            plan: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
            cancelled_at: None,
        }
    }

    pub fn generate_id() -> String {
        format!("session_{}", Uuid::new_v4().simple())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Partition count fixed by planning; immutable once distributed
    pub fn partition_count(&self) -> Option<u32> {
        self.plan.as_ref().map(|plan| plan.partition_count)
    }

    pub fn transition_to(&mut self, status: SessionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        if status.is_terminal() {
            self.finished_at.get_or_insert(now);
        } else {
            self.finished_at = None;
        }
    }
}

/// Result of the planner's narrow pre-scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub partition_count: u32,
    pub distinct_key_estimate: u64,
    pub total_records: u64,
    pub scan_duration: Duration,
}

impl PartitionPlan {
    pub fn items_per_partition(&self) -> u64 {
        self.distinct_key_estimate / u64::from(self.partition_count.max(1))
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            partition_count: self.partition_count,
            distinct_key_estimate: self.distinct_key_estimate,
            total_records: self.total_records,
            items_per_partition: self.items_per_partition(),
            scan_duration_ms: u64::try_from(self.scan_duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Plan facts persisted on the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub partition_count: u32,
    pub distinct_key_estimate: u64,
    pub total_records: u64,
    pub items_per_partition: u64,
    pub scan_duration_ms: u64,
}
