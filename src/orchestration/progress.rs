//! # Progress Aggregator
//!
//! Read-only rollup of a session's task records. Counts are taken from the
//! task records themselves, so `pending + processing + completed + failed`
//! always equals the task total, and a session still planning reports all
//! zeroes.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::error::{DispatchError, DispatchResult};
use crate::models::SessionProgress;
use crate::store::StateStore;

pub struct ProgressAggregator {
    store: Arc<dyn StateStore>,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn status(&self, session_id: &str) -> DispatchResult<SessionProgress> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("session", session_id))?;
        let tasks = self.store.list_session_tasks(session_id).await?;
        Ok(SessionProgress::build(&session, &tasks, Utc::now()))
    }
}
