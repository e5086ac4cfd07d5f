//! # PostgreSQL Sink
//!
//! Multi-row `INSERT ... ON CONFLICT DO UPDATE` keyed by
//! `(session_id, record_id)`. Batches larger than one statement can bind are
//! split across statements inside a single transaction.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, error, instrument};

use super::traits::{OutputRecord, RecordSink, SinkError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dispatch_results (
    session_id TEXT        NOT NULL,
    record_id  TEXT        NOT NULL,
    remainder  BIGINT      NOT NULL,
    status     TEXT        NOT NULL,
    payload    JSONB,
    error      TEXT,
    written_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (session_id, record_id)
);
"#;

/// Parameters bound per output row
const BINDS_PER_ROW: usize = 6;

/// PostgreSQL accepts at most `u16::MAX` bind parameters per statement
const MAX_ROWS_PER_STATEMENT: usize = u16::MAX as usize / BINDS_PER_ROW;

fn statement_chunks(records: &[OutputRecord]) -> std::slice::Chunks<'_, OutputRecord> {
    records.chunks(MAX_ROWS_PER_STATEMENT)
}

#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for PostgresSink {
    #[instrument(skip(self, records), fields(batch_size = records.len()))]
    async fn upsert_batch(&self, records: &[OutputRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to open result transaction: {}", e);
            SinkError::Unavailable(e.to_string())
        })?;

        for chunk in statement_chunks(records) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO dispatch_results (session_id, record_id, remainder, status, payload, error) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(&record.session_id)
                    .push_bind(&record.record_id)
                    .push_bind(i64::from(record.remainder))
                    .push_bind(record.status.as_str())
                    .push_bind(record.payload.as_ref().map(Json))
                    .push_bind(&record.error);
            });
            builder.push(
                " ON CONFLICT (session_id, record_id) DO UPDATE SET \
                 remainder = EXCLUDED.remainder, status = EXCLUDED.status, \
                 payload = EXCLUDED.payload, error = EXCLUDED.error, written_at = now()",
            );

            builder.build().execute(&mut *tx).await.map_err(|e| {
                error!("Failed to upsert result batch: {}", e);
                SinkError::Unavailable(e.to_string())
            })?;
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit result batch: {}", e);
            SinkError::Unavailable(e.to_string())
        })?;

        debug!(rows = records.len(), "Upserted result batch");
        Ok(())
    }
}
