//! # Record Sources
//!
//! Streamed readers for the bulk data a session partitions. The same source
//! serves the planner's narrow key-only scan and each worker's full scan.

pub mod jsonl;
pub mod memory;
pub mod traits;

pub use jsonl::JsonLinesSource;
pub use memory::MemorySource;
pub use traits::{Record, RecordSource, RecordStream, SourceError};
