//! # Record Sinks
//!
//! Idempotent, identity-keyed output for processed records.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use memory::MemorySink;
#[cfg(feature = "postgres")]
pub use postgres::PostgresSink;
pub use traits::{OutputRecord, OutputStatus, RecordSink, SinkError};
