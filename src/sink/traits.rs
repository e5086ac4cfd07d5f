use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    Succeeded,
    Failed,
}

impl OutputStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// One processed record as written to the sink.
///
/// `(session_id, record_id)` is the upsert key. Only attempt-independent
/// fields are carried, so a rerun rewrites identical rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub session_id: String,
    /// Normalised partition key value
    pub record_id: String,
    pub remainder: u32,
    pub status: OutputStatus,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink rejected record {record_id}: {reason}")]
    Rejected { record_id: String, reason: String },
}

/// Destination for processed records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert or replace every record by its identity
    async fn upsert_batch(&self, records: &[OutputRecord]) -> Result<(), SinkError>;
}
