use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::partitioning::normalize_key;

/// One homogeneous input record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Parse one JSON object, rejecting any other JSON value
    pub fn from_json_str(line: &str) -> Result<Self, String> {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => Ok(Self(fields)),
            Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Normalised partition key value, or `None` when the field is missing,
    /// null, or blank.
    pub fn key(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::Null => None,
            Value::String(raw) => normalize_key(raw).map(str::to_string),
            other => Some(other.to_string()),
        }
    }

    /// Copy holding only `columns`
    pub fn project(&self, columns: &[String]) -> Self {
        let fields = columns
            .iter()
            .filter_map(|column| {
                self.0
                    .get(column)
                    .map(|value| (column.clone(), value.clone()))
            })
            .collect();
        Self(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source {source_ref} is unavailable: {reason}")]
    Unavailable { source_ref: String, reason: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record at {location}: {reason}")]
    Parse { location: String, reason: String },
}

impl SourceError {
    pub fn unavailable(source_ref: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            source_ref: source_ref.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Streamed records; memory use stays bounded by the consumer
pub type RecordStream = BoxStream<'static, Result<Record, SourceError>>;

/// Bulk data reader
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Stream records of `source_ref` in source order.
    ///
    /// With `columns`, only those fields are read (narrow scan).
    async fn scan(
        &self,
        source_ref: &str,
        columns: Option<&[String]>,
    ) -> Result<RecordStream, SourceError>;

    /// Declared column names, for sources that carry a schema.
    ///
    /// `None` means schemaless; callers then check fields record by record.
    async fn columns(&self, _source_ref: &str) -> Result<Option<Vec<String>>, SourceError> {
        Ok(None)
    }
}
