//! # Resilience
//!
//! Bounded retry of transient state store and work queue failures.

pub mod retry_policy;

pub use retry_policy::RetryPolicy;
