//! # PostgreSQL State Store
//!
//! Sessions and tasks are stored as JSONB records next to the columns the
//! store filters on. The per-status sets of the key layout are answered by
//! indexed queries on `(session_id, status)` instead of separate set rows.
//! Every task write is a single-row `UPDATE ... WHERE version = $n`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info, instrument};

use super::traits::StateStore;
use crate::config::StoreConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::models::{Session, Task};
use crate::state_machine::{SessionStatus, TaskStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dispatch_sessions (
    session_id TEXT        PRIMARY KEY,
    status     TEXT        NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    record     JSONB       NOT NULL
);
CREATE TABLE IF NOT EXISTS dispatch_tasks (
    task_id    TEXT    PRIMARY KEY,
    session_id TEXT    NOT NULL,
    remainder  BIGINT  NOT NULL,
    status     TEXT    NOT NULL,
    dead       BOOLEAN NOT NULL DEFAULT FALSE,
    version    BIGINT  NOT NULL DEFAULT 0,
    record     JSONB   NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dispatch_tasks_session_status
    ON dispatch_tasks (session_id, status);
"#;

#[derive(Debug, Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the store section of the configuration
    pub async fn connect(config: &StoreConfig) -> DispatchResult<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            DispatchError::Validation("store.database_url is required".to_string())
        })?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;
        info!(max_connections = config.max_connections, "Connected state store pool");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> DispatchResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn version_param(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

#[async_trait]
impl StateStore for PostgresStateStore {
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn create_session(&self, session: &Session) -> DispatchResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO dispatch_sessions (session_id, status, created_at, record)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&session.session_id)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(Json(session))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_session(&self, session_id: &str) -> DispatchResult<Option<Session>> {
        let row: Option<(Json<Session>,)> =
            sqlx::query_as("SELECT record FROM dispatch_sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(record,)| record.0))
    }

    async fn compare_and_swap_session(
        &self,
        expected: SessionStatus,
        next: &Session,
    ) -> DispatchResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_sessions SET status = $2, record = $3
             WHERE session_id = $1 AND status = $4
            "#,
        )
        .bind(&next.session_id)
        .bind(next.status.as_str())
        .bind(Json(next))
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.get_session(&next.session_id).await?.is_none() {
            return Err(DispatchError::not_found("session", &next.session_id));
        }
        Ok(false)
    }

    async fn list_sessions(&self) -> DispatchResult<Vec<Session>> {
        let rows: Vec<(Json<Session>,)> =
            sqlx::query_as("SELECT record FROM dispatch_sessions ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(record,)| record.0).collect())
    }

    #[instrument(skip(self))]
    async fn delete_session(&self, session_id: &str) -> DispatchResult<bool> {
        let mut tx = self.pool.begin().await?;
        let tasks = sqlx::query("DELETE FROM dispatch_tasks WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        let session = sqlx::query("DELETE FROM dispatch_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(
            session_id,
            tasks_deleted = tasks.rows_affected(),
            "Deleted session records"
        );
        Ok(session.rows_affected() == 1)
    }

    #[instrument(skip(self, task), fields(task_id = %task.task_id))]
    async fn create_task(&self, task: &Task) -> DispatchResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO dispatch_tasks (task_id, session_id, remainder, status, dead, version, record)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (task_id) DO NOTHING
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.session_id)
        .bind(i64::from(task.remainder))
        .bind(task.status.as_str())
        .bind(task.is_dead())
        .bind(version_param(task.version))
        .bind(Json(task))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_task(&self, task_id: &str) -> DispatchResult<Option<Task>> {
        let row: Option<(Json<Task>,)> =
            sqlx::query_as("SELECT record FROM dispatch_tasks WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(record,)| record.0))
    }

    async fn list_session_tasks(&self, session_id: &str) -> DispatchResult<Vec<Task>> {
        let rows: Vec<(Json<Task>,)> = sqlx::query_as(
            "SELECT record FROM dispatch_tasks WHERE session_id = $1 ORDER BY remainder",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(record,)| record.0).collect())
    }

    async fn task_ids_with_status(
        &self,
        session_id: &str,
        status: TaskStatus,
    ) -> DispatchResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT task_id FROM dispatch_tasks WHERE session_id = $1 AND status = $2 ORDER BY task_id",
        )
        .bind(session_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn dead_task_ids(&self, session_id: &str) -> DispatchResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT task_id FROM dispatch_tasks WHERE session_id = $1 AND dead ORDER BY task_id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    #[instrument(skip(self, expected, next), fields(task_id = %expected.task_id, to = %next.status))]
    async fn compare_and_swap_task(
        &self,
        expected: &Task,
        next: &Task,
    ) -> DispatchResult<Option<Task>> {
        let mut written = next.clone();
        written.version = expected.version + 1;

        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            UPDATE dispatch_tasks
               SET status = $2, dead = $3, version = $4, record = $5
             WHERE task_id = $1 AND version = $6
            RETURNING now()
            "#,
        )
        .bind(&written.task_id)
        .bind(written.status.as_str())
        .bind(written.is_dead())
        .bind(version_param(written.version))
        .bind(Json(&written))
        .bind(version_param(expected.version))
        .fetch_optional(&self.pool)
        .await?;

        if row.is_some() {
            return Ok(Some(written));
        }
        if self.get_task(&expected.task_id).await?.is_none() {
            return Err(DispatchError::not_found("task", &expected.task_id));
        }
        debug!("Task compare-and-swap lost to a concurrent writer");
        Ok(None)
    }
}
