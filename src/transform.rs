//! # Record Transformation
//!
//! The per-record conversion a worker applies. Implementations must be pure:
//! the same record and context always give the same output, with no side
//! effects, so tasks can be re-run after a crash or a duplicate delivery.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::Record;

/// Conversion parameters shared by every record of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformContext {
    pub session_id: String,
    pub from_format: String,
    pub to_format: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Transform failed: {message}")]
pub struct TranspileError {
    pub message: String,
}

impl TranspileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Synchronous, side-effect-free record conversion, safe to call
/// concurrently across workers
pub trait RecordTransformer: Send + Sync {
    fn transform(&self, record: &Record, context: &TransformContext)
        -> Result<Record, TranspileError>;
}

/// Passes records through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransformer;

impl RecordTransformer for IdentityTransformer {
    fn transform(
        &self,
        record: &Record,
        _context: &TransformContext,
    ) -> Result<Record, TranspileError> {
        Ok(record.clone())
    }
}

/// Adapter for closures
pub struct FnTransformer<F>(pub F);

impl<F> RecordTransformer for FnTransformer<F>
where
    F: Fn(&Record, &TransformContext) -> Result<Record, TranspileError> + Send + Sync,
{
    fn transform(
        &self,
        record: &Record,
        context: &TransformContext,
    ) -> Result<Record, TranspileError> {
        (self.0)(record, context)
    }
}

impl<F> std::fmt::Debug for FnTransformer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnTransformer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Record {
        match json!({"query": "select 1"}) {
            serde_json::Value::Object(fields) => Record::new(fields),
            _ => unreachable!(),
        }
    }

    #[test]
    fn identity_returns_input() {
        let ctx = TransformContext::default();
        assert_eq!(IdentityTransformer.transform(&record(), &ctx).unwrap(), record());
    }

    #[test]
    fn closure_transformer_can_reject() {
        let upper = FnTransformer(|record: &Record, ctx: &TransformContext| {
            let query = record
                .key("query")
                .ok_or_else(|| TranspileError::new("no query"))?;
            let mut out = record.clone();
            out.insert("converted", json!(format!("{}:{}", ctx.to_format, query.to_uppercase())));
            Ok(out)
        });
        let ctx = TransformContext {
            to_format: "snowflake".into(),
            ..TransformContext::default()
        };

        let out = upper.transform(&record(), &ctx).unwrap();
        assert_eq!(out.get("converted"), Some(&json!("snowflake:SELECT 1")));
        assert!(upper.transform(&Record::default(), &ctx).is_err());
    }
}
