//! # PostgreSQL Work Queue
//!
//! Table-backed queue in the style of pgmq: each message carries a visibility
//! timestamp (`vt`), receivers lock the oldest visible row with
//! `FOR UPDATE SKIP LOCKED` and push its `vt` forward, and acknowledgement
//! deletes the row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

use super::traits::{Delivery, MessageId, QueueDepth, ReceiptHandle, WorkQueue};
use crate::error::{DispatchError, DispatchResult};
use crate::models::WorkItem;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dispatch_queue (
    msg_id      BIGSERIAL PRIMARY KEY,
    queue_name  TEXT        NOT NULL,
    payload     JSONB       NOT NULL,
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    vt          TIMESTAMPTZ NOT NULL DEFAULT now(),
    read_ct     INTEGER     NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_dispatch_queue_visible ON dispatch_queue (queue_name, vt, msg_id);
"#;

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    msg_id: i64,
    payload: Json<WorkItem>,
    read_ct: i32,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PostgresWorkQueue {
    pool: PgPool,
    name: String,
}

impl PostgresWorkQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    /// Create the queue table if it does not exist
    pub async fn ensure_schema(&self) -> DispatchResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn parse_receipt(receipt: &ReceiptHandle) -> DispatchResult<i64> {
        receipt
            .as_str()
            .parse()
            .map_err(|_| DispatchError::Queue(format!("invalid receipt handle {receipt}")))
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn queue_error(operation: &str, e: sqlx::Error) -> DispatchError {
    match DispatchError::from(e) {
        DispatchError::Database(message) => DispatchError::Queue(format!("{operation}: {message}")),
        transient => transient,
    }
}

#[async_trait]
impl WorkQueue for PostgresWorkQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, item), fields(queue = %self.name, task_id = %item.task_id))]
    async fn enqueue_delayed(
        &self,
        item: &WorkItem,
        delay: Duration,
    ) -> DispatchResult<MessageId> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO dispatch_queue (queue_name, payload, vt)
            VALUES ($1, $2, now() + ($3::BIGINT * interval '1 millisecond'))
            RETURNING msg_id
            "#,
        )
        .bind(&self.name)
        .bind(Json(item))
        .bind(millis(delay))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to enqueue work item: {}", e);
            queue_error("enqueue", e)
        })?;

        let id = u64::try_from(row.0)
            .map_err(|_| DispatchError::Queue(format!("negative message id {}", row.0)))?;
        debug!(msg_id = id, delay_ms = millis(delay), "Enqueued work item");
        Ok(MessageId(id))
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn receive(&self, visibility_timeout: Duration) -> DispatchResult<Option<Delivery>> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            UPDATE dispatch_queue
               SET vt = now() + ($2::BIGINT * interval '1 millisecond'),
                   read_ct = read_ct + 1
             WHERE msg_id = (
                   SELECT msg_id FROM dispatch_queue
                    WHERE queue_name = $1 AND vt <= now()
                    ORDER BY msg_id
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED)
            RETURNING msg_id, payload, read_ct, enqueued_at
            "#,
        )
        .bind(&self.name)
        .bind(millis(visibility_timeout))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| queue_error("receive", e))?;

        Ok(row.map(|row| Delivery {
            item: row.payload.0,
            receipt: ReceiptHandle::new(row.msg_id.to_string()),
            receive_count: u32::try_from(row.read_ct).unwrap_or(0),
            enqueued_at: row.enqueued_at,
        }))
    }

    async fn ack(&self, receipt: &ReceiptHandle) -> DispatchResult<()> {
        let id = Self::parse_receipt(receipt)?;
        let result = sqlx::query("DELETE FROM dispatch_queue WHERE msg_id = $1 AND queue_name = $2")
            .bind(id)
            .bind(&self.name)
            .execute(&self.pool)
            .await
            .map_err(|e| queue_error("ack", e))?;
        if result.rows_affected() == 0 {
            return Err(DispatchError::Queue(format!("message {id} not found")));
        }
        Ok(())
    }

    async fn nack(&self, receipt: &ReceiptHandle, requeue: bool) -> DispatchResult<()> {
        let id = Self::parse_receipt(receipt)?;
        let query = if requeue {
            "UPDATE dispatch_queue SET vt = now() WHERE msg_id = $1 AND queue_name = $2"
        } else {
            "DELETE FROM dispatch_queue WHERE msg_id = $1 AND queue_name = $2"
        };
        let result = sqlx::query(query)
            .bind(id)
            .bind(&self.name)
            .execute(&self.pool)
            .await
            .map_err(|e| queue_error("nack", e))?;
        if result.rows_affected() == 0 {
            return Err(DispatchError::Queue(format!("message {id} not found")));
        }
        Ok(())
    }

    async fn depth(&self) -> DispatchResult<QueueDepth> {
        let (total, visible): (i64, i64) = sqlx::query_as(
            r#"
            SELECT count(*), count(*) FILTER (WHERE vt <= now())
              FROM dispatch_queue
             WHERE queue_name = $1
            "#,
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| queue_error("depth", e))?;

        let total = u64::try_from(total).unwrap_or(0);
        let visible = u64::try_from(visible).unwrap_or(0);
        Ok(QueueDepth {
            total,
            visible,
            invisible: total.saturating_sub(visible),
        })
    }
}
