use crate::error::DispatchResult;
use crate::models::{Session, Task};
use crate::state_machine::{SessionStatus, TaskStatus};
use async_trait::async_trait;

/// Shared, durable store of session and task metadata.
///
/// The store is the single source of truth for status. Every write touches a
/// single session or task record (plus the set memberships derived from it);
/// nothing here spans more than one task.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a new session and add it to the session index.
    ///
    /// Returns `false` without writing when the id already exists.
    async fn create_session(&self, session: &Session) -> DispatchResult<bool>;

    async fn get_session(&self, session_id: &str) -> DispatchResult<Option<Session>>;

    /// Replace the session record only if its stored status is `expected`
    async fn compare_and_swap_session(
        &self,
        expected: SessionStatus,
        next: &Session,
    ) -> DispatchResult<bool>;

    async fn list_sessions(&self) -> DispatchResult<Vec<Session>>;

    /// Remove a session with every task record and set belonging to it
    async fn delete_session(&self, session_id: &str) -> DispatchResult<bool>;

    /// Atomically create a task, registering it in the session's task index
    /// and status set. Never overwrites: returns `false` if the id exists.
    async fn create_task(&self, task: &Task) -> DispatchResult<bool>;

    async fn get_task(&self, task_id: &str) -> DispatchResult<Option<Task>>;

    /// All tasks of a session, sorted by remainder
    async fn list_session_tasks(&self, session_id: &str) -> DispatchResult<Vec<Task>>;

    /// Task ids currently in `status` for a session
    async fn task_ids_with_status(
        &self,
        session_id: &str,
        status: TaskStatus,
    ) -> DispatchResult<Vec<String>>;

    /// Terminally failed task ids of a session, sorted
    async fn dead_task_ids(&self, session_id: &str) -> DispatchResult<Vec<String>>;

    /// Replace `expected` with `next` if nobody else has written the task
    /// since `expected` was read (same `version`).
    ///
    /// On success the stored record is returned with its bumped version;
    /// `None` means the swap lost to a concurrent writer.
    async fn compare_and_swap_task(&self, expected: &Task, next: &Task)
        -> DispatchResult<Option<Task>>;
}
