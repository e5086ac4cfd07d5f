//! # In-Memory Work Queue
//!
//! Single-process queue with visibility-timeout semantics, for tests and
//! embedded use.
//!
//! - **Visibility Timeout**: a received item is hidden until its timeout
//!   passes, then becomes receivable again with a higher receive count
//! - **Delayed Publish**: `enqueue_delayed` stores the item already hidden
//! - **FIFO**: visible items are handed out in publish order

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::traits::{Delivery, MessageId, QueueDepth, ReceiptHandle, WorkQueue};
use crate::error::{DispatchError, DispatchResult};
use crate::models::WorkItem;

#[derive(Debug, Clone)]
struct QueuedItem {
    id: u64,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    /// None = visible now
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
}

impl QueuedItem {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.visible_at.map(|vt| vt <= now).unwrap_or(true)
    }
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<QueuedItem>,
    next_id: u64,
}

#[derive(Debug)]
pub struct InMemoryWorkQueue {
    name: String,
    state: Mutex<QueueState>,
}

impl InMemoryWorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    /// Number of stored items, visible or not
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of every stored item in publish order
    pub fn pending_items(&self) -> DispatchResult<Vec<WorkItem>> {
        let state = self.state.lock();
        state
            .items
            .iter()
            .map(|item| serde_json::from_slice(&item.payload).map_err(DispatchError::from))
            .collect()
    }

    /// Make every item visible now, skipping outstanding delays
    pub fn release_all(&self) {
        let mut state = self.state.lock();
        for item in state.items.iter_mut() {
            item.visible_at = None;
        }
    }

    fn parse_receipt(receipt: &ReceiptHandle) -> DispatchResult<u64> {
        receipt
            .as_str()
            .parse()
            .map_err(|_| DispatchError::Queue(format!("invalid receipt handle {receipt}")))
    }
}

fn chrono_duration(duration: Duration) -> DispatchResult<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| DispatchError::Queue(format!("duration out of range: {e}")))
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn enqueue_delayed(
        &self,
        item: &WorkItem,
        delay: Duration,
    ) -> DispatchResult<MessageId> {
        let payload = serde_json::to_vec(item)?;
        let now = Utc::now();
        let visible_at = if delay.is_zero() {
            None
        } else {
            Some(now + chrono_duration(delay)?)
        };

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.items.push_back(QueuedItem {
            id,
            payload,
            enqueued_at: now,
            visible_at,
            receive_count: 0,
        });
        Ok(MessageId(id))
    }

    async fn receive(&self, visibility_timeout: Duration) -> DispatchResult<Option<Delivery>> {
        let now = Utc::now();
        let hidden_until = now + chrono_duration(visibility_timeout)?;

        let mut state = self.state.lock();
        let Some(queued) = state.items.iter_mut().find(|item| item.is_visible(now)) else {
            return Ok(None);
        };

        let item: WorkItem = serde_json::from_slice(&queued.payload)?;
        queued.visible_at = Some(hidden_until);
        queued.receive_count += 1;

        Ok(Some(Delivery {
            item,
            receipt: ReceiptHandle::from(MessageId(queued.id)),
            receive_count: queued.receive_count,
            enqueued_at: queued.enqueued_at,
        }))
    }

    async fn ack(&self, receipt: &ReceiptHandle) -> DispatchResult<()> {
        let id = Self::parse_receipt(receipt)?;
        let mut state = self.state.lock();
        match state.items.iter().position(|item| item.id == id) {
            Some(pos) => {
                state.items.remove(pos);
                Ok(())
            }
            None => Err(DispatchError::Queue(format!("message {id} not found"))),
        }
    }

    async fn nack(&self, receipt: &ReceiptHandle, requeue: bool) -> DispatchResult<()> {
        let id = Self::parse_receipt(receipt)?;
        let mut state = self.state.lock();
        let Some(pos) = state.items.iter().position(|item| item.id == id) else {
            return Err(DispatchError::Queue(format!("message {id} not found")));
        };
        if requeue {
            if let Some(item) = state.items.get_mut(pos) {
                item.visible_at = None;
            }
        } else {
            state.items.remove(pos);
        }
        Ok(())
    }

    async fn depth(&self) -> DispatchResult<QueueDepth> {
        let now = Utc::now();
        let state = self.state.lock();
        let total = state.items.len() as u64;
        let visible = state.items.iter().filter(|item| item.is_visible(now)).count() as u64;
        Ok(QueueDepth {
            total,
            visible,
            invisible: total - visible,
        })
    }
}
