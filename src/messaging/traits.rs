//! # Work Queue Traits
//!
//! At-least-once delivery channel between the distributor, the retry
//! supervisor, and workers. A received item stays invisible for its
//! visibility timeout and reappears unless acknowledged.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchResult;
use crate::models::WorkItem;

/// Opaque identifier returned on publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle used to acknowledge one delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<MessageId> for ReceiptHandle {
    fn from(id: MessageId) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One received work item
#[derive(Debug, Clone)]
pub struct Delivery {
    pub item: WorkItem,
    pub receipt: ReceiptHandle,
    /// How many times this message has been handed out, this one included
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub total: u64,
    /// Receivable right now
    pub visible: u64,
    /// Received and not yet acknowledged, or delayed
    pub invisible: u64,
}

#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    fn queue_name(&self) -> &str;

    async fn enqueue(&self, item: &WorkItem) -> DispatchResult<MessageId> {
        self.enqueue_delayed(item, Duration::ZERO).await
    }

    /// Publish an item that becomes receivable only after `delay`
    async fn enqueue_delayed(&self, item: &WorkItem, delay: Duration)
        -> DispatchResult<MessageId>;

    /// Receive at most one visible item, hiding it for `visibility_timeout`.
    ///
    /// Prefetch is always one so an idle worker gets the next item instead of
    /// a busy worker holding several.
    async fn receive(&self, visibility_timeout: Duration) -> DispatchResult<Option<Delivery>>;

    /// Remove a delivered item for good
    async fn ack(&self, receipt: &ReceiptHandle) -> DispatchResult<()>;

    /// Release a delivered item; `requeue` makes it visible immediately,
    /// otherwise it is dropped.
    async fn nack(&self, receipt: &ReceiptHandle, requeue: bool) -> DispatchResult<()>;

    async fn depth(&self) -> DispatchResult<QueueDepth>;
}
