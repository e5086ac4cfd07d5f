//! # In-Memory State Store
//!
//! Key/value plus set store laid out exactly like the persisted key schema in
//! [`crate::constants::keys`]. Used by tests, benchmarks, and single-process
//! deployments.

use super::traits::StateStore;
use crate::constants::{keys, status_groups};
use crate::error::{DispatchError, DispatchResult};
use crate::models::{Session, Task};
use crate::state_machine::{SessionStatus, TaskStatus};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    sessions: DashMap<String, Session>,
    tasks: DashMap<String, Task>,
    sets: DashMap<String, BTreeSet<String>>,
    /// Operations left to fail with `StateStoreUnavailable`
    outage: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `operations` calls fail as if the store were down
    pub fn inject_outage(&self, operations: usize) {
        self.outage.store(operations, Ordering::SeqCst);
    }

    fn check_available(&self) -> DispatchResult<()> {
        let tripped = self
            .outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            debug!("Simulated state store outage");
            return Err(DispatchError::StateStoreUnavailable(
                "in-memory store outage".to_string(),
            ));
        }
        Ok(())
    }

    fn add_member(&self, set: String, member: &str) {
        self.sets.entry(set).or_default().insert(member.to_string());
    }

    fn remove_member(&self, set: &str, member: &str) {
        if let Some(mut members) = self.sets.get_mut(set) {
            members.remove(member);
        }
    }

    fn members(&self, set: &str) -> Vec<String> {
        self.sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Raw set contents by key, for inspecting the persisted layout
    pub fn set_members(&self, key: &str) -> Vec<String> {
        self.members(key)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create_session(&self, session: &Session) -> DispatchResult<bool> {
        self.check_available()?;
        match self.sessions.entry(keys::session(&session.session_id)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                self.add_member(keys::SESSION_INDEX.to_string(), &session.session_id);
                Ok(true)
            }
        }
    }

    async fn get_session(&self, session_id: &str) -> DispatchResult<Option<Session>> {
        self.check_available()?;
        Ok(self
            .sessions
            .get(&keys::session(session_id))
            .map(|session| session.clone()))
    }

    async fn compare_and_swap_session(
        &self,
        expected: SessionStatus,
        next: &Session,
    ) -> DispatchResult<bool> {
        self.check_available()?;
        let Some(mut stored) = self.sessions.get_mut(&keys::session(&next.session_id)) else {
            return Err(DispatchError::not_found("session", &next.session_id));
        };
        if stored.status != expected {
            return Ok(false);
        }
        *stored = next.clone();
        Ok(true)
    }

    async fn list_sessions(&self) -> DispatchResult<Vec<Session>> {
        self.check_available()?;
        let mut sessions: Vec<Session> = self
            .members(keys::SESSION_INDEX)
            .iter()
            .filter_map(|id| self.sessions.get(&keys::session(id)).map(|s| s.clone()))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn delete_session(&self, session_id: &str) -> DispatchResult<bool> {
        self.check_available()?;
        let removed = self.sessions.remove(&keys::session(session_id)).is_some();

        for task_id in self.members(&keys::session_tasks(session_id)) {
            self.tasks.remove(&keys::task(&task_id));
        }
        self.sets.remove(&keys::session_tasks(session_id));
        self.sets.remove(&keys::session_dead_set(session_id));
        for status in status_groups::ALL {
            self.sets
                .remove(&keys::session_status_set(session_id, *status));
        }
        self.remove_member(keys::SESSION_INDEX, session_id);

        Ok(removed)
    }

    async fn create_task(&self, task: &Task) -> DispatchResult<bool> {
        self.check_available()?;
        match self.tasks.entry(keys::task(&task.task_id)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                self.add_member(keys::session_tasks(&task.session_id), &task.task_id);
                self.add_member(
                    keys::session_status_set(&task.session_id, task.status),
                    &task.task_id,
                );
                Ok(true)
            }
        }
    }

    async fn get_task(&self, task_id: &str) -> DispatchResult<Option<Task>> {
        self.check_available()?;
        Ok(self.tasks.get(&keys::task(task_id)).map(|task| task.clone()))
    }

    async fn list_session_tasks(&self, session_id: &str) -> DispatchResult<Vec<Task>> {
        self.check_available()?;
        let mut tasks: Vec<Task> = self
            .members(&keys::session_tasks(session_id))
            .iter()
            .filter_map(|id| self.tasks.get(&keys::task(id)).map(|t| t.clone()))
            .collect();
        tasks.sort_by_key(|task| task.remainder);
        Ok(tasks)
    }

    async fn task_ids_with_status(
        &self,
        session_id: &str,
        status: TaskStatus,
    ) -> DispatchResult<Vec<String>> {
        self.check_available()?;
        Ok(self.members(&keys::session_status_set(session_id, status)))
    }

    async fn dead_task_ids(&self, session_id: &str) -> DispatchResult<Vec<String>> {
        self.check_available()?;
        Ok(self.members(&keys::session_dead_set(session_id)))
    }

    async fn compare_and_swap_task(
        &self,
        expected: &Task,
        next: &Task,
    ) -> DispatchResult<Option<Task>> {
        self.check_available()?;
        let Some(mut stored) = self.tasks.get_mut(&keys::task(&expected.task_id)) else {
            return Err(DispatchError::not_found("task", &expected.task_id));
        };
        if stored.version != expected.version {
            return Ok(None);
        }

        let mut written = next.clone();
        written.version = expected.version + 1;

        let session_id = &written.session_id;
        if stored.status != written.status {
            self.remove_member(
                &keys::session_status_set(session_id, stored.status),
                &written.task_id,
            );
            self.add_member(
                keys::session_status_set(session_id, written.status),
                &written.task_id,
            );
        }
        if written.is_dead() {
            self.add_member(keys::session_dead_set(session_id), &written.task_id);
        } else {
            self.remove_member(&keys::session_dead_set(session_id), &written.task_id);
        }

        *stored = written.clone();
        Ok(Some(written))
    }
}
