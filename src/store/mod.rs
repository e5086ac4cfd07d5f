//! # State Store
//!
//! Durable session and task metadata behind the [`StateStore`] trait.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use memory::MemoryStateStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStateStore;
pub use traits::StateStore;
