//! # Session Finalizer
//!
//! Persists the aggregate outcome of a running session once none of its tasks
//! has outstanding work. Any worker may call this after any task outcome;
//! the status write is a compare-and-swap from `running`, so concurrent
//! finalizers and a concurrent cancel cannot overwrite each other. Calling
//! it again for an already finished session is a no-op.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::error::{DispatchError, DispatchResult};
use crate::logging::log_session_operation;
use crate::models::TaskCounts;
use crate::resilience::RetryPolicy;
use crate::state_machine::SessionStatus;
use crate::store::StateStore;

pub struct SessionFinalizer {
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
}

impl SessionFinalizer {
    pub fn new(store: Arc<dyn StateStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Returns the status written, or `None` when the session is not ready
    /// or not running.
    #[instrument(skip(self))]
    pub async fn finalize(&self, session_id: &str) -> DispatchResult<Option<SessionStatus>> {
        let store = &self.store;
        let session = self
            .retry
            .run("get_session", move || store.get_session(session_id))
            .await?
            .ok_or_else(|| DispatchError::not_found("session", session_id))?;
        if session.status != SessionStatus::Running {
            return Ok(None);
        }

        let tasks = self
            .retry
            .run("list_session_tasks", move || store.list_session_tasks(session_id))
            .await?;
        let counts = TaskCounts::from_tasks(&tasks);
        let Some(status) = counts.derive_status() else {
            debug!(outstanding = counts.outstanding(), "Session still has outstanding tasks");
            return Ok(None);
        };

        let mut finished = session.clone();
        finished.transition_to(status, Utc::now());
        finished.status_reason = (counts.dead > 0)
            .then(|| format!("{} of {} tasks failed terminally", counts.dead, counts.total));

        let finished_ref = &finished;
        let swapped = self
            .retry
            .run("compare_and_swap_session", move || {
                store.compare_and_swap_session(SessionStatus::Running, finished_ref)
            })
            .await?;
        if !swapped {
            return Ok(None);
        }

        log_session_operation(
            "finalize",
            session_id,
            status.as_str(),
            finished.status_reason.as_deref(),
        );
        Ok(Some(status))
    }
}
