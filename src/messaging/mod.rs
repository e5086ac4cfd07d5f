//! # Work Queue
//!
//! The [`WorkQueue`] trait with an in-memory provider and a PostgreSQL
//! provider.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use in_memory::InMemoryWorkQueue;
#[cfg(feature = "postgres")]
pub use postgres::PostgresWorkQueue;
pub use traits::{Delivery, MessageId, QueueDepth, ReceiptHandle, WorkQueue};
