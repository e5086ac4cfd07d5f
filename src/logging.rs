//! # Structured Logging Module
//!
//! Console logging through the tracing ecosystem, plus the structured
//! operation records dashboards key on.

use crate::config::{LogFormat, LoggingConfig};
use chrono::Utc;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Initialize logging. `RUST_LOG` wins over the configured level.
///
/// Safe to call more than once: if a global subscriber is already installed
/// (tests, embedding applications) the existing one is kept.
pub fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(false)
            .json()
            .boxed(),
    };

    if tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized - keeping it");
    }
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    session_id: &str,
    task_id: &str,
    remainder: Option<u32>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        session_id = %session_id,
        task_id = %task_id,
        remainder = remainder,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "TASK_OPERATION"
    );
}

/// Log structured data for session operations
pub fn log_session_operation(
    operation: &str,
    session_id: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        session_id = %session_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "SESSION_OPERATION"
    );
}
