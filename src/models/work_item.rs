use super::{Session, Task};
use serde::{Deserialize, Serialize};

/// Message published to the work queue for one task attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub session_id: String,
    pub task_id: String,
    pub remainder: u32,
    pub total_partitions: u32,
    pub source_ref: String,
    pub key_field: String,
    pub from_format: String,
    pub to_format: String,
    /// Task `retry_count` at publication; older deliveries are stale
    pub attempt: u32,
}

impl WorkItem {
    pub fn for_task(session: &Session, task: &Task) -> Self {
        Self {
            session_id: session.session_id.clone(),
            task_id: task.task_id.clone(),
            remainder: task.remainder,
            total_partitions: task.total_partitions,
            source_ref: session.source_ref.clone(),
            key_field: session.partition_key_field.clone(),
            from_format: session.from_format.clone(),
            to_format: session.to_format.clone(),
            attempt: task.retry_count,
        }
    }
}
