//! Partition Worker Binary
//!
//! Runs `worker.concurrency` worker slots against the PostgreSQL state store,
//! work queue and result sink, reading JSON-lines sources from the local
//! filesystem. Stops on Ctrl-C after each slot finishes its current task.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::info;

use partition_dispatch::config::ConfigManager;
use partition_dispatch::logging::init_logging;
use partition_dispatch::messaging::PostgresWorkQueue;
use partition_dispatch::sink::PostgresSink;
use partition_dispatch::source::JsonLinesSource;
use partition_dispatch::store::PostgresStateStore;
use partition_dispatch::transform::IdentityTransformer;
use partition_dispatch::worker::{WorkerContext, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let manager = ConfigManager::load().context("failed to load configuration")?;
    let config = manager.config();
    init_logging(&config.logging);

    info!(
        environment = manager.environment(),
        queue = %config.queue.queue_name,
        concurrency = config.worker.concurrency,
        "Starting partition worker"
    );

    let store = PostgresStateStore::connect(&config.store)
        .await
        .context("failed to connect to the state store")?;
    store.ensure_schema().await?;

    let queue = PostgresWorkQueue::new(store.pool().clone(), config.queue.queue_name.clone());
    queue.ensure_schema().await?;

    let sink = PostgresSink::new(store.pool().clone());
    sink.ensure_schema().await?;

    let source = match std::env::var("DISPATCH_SOURCE_ROOT") {
        Ok(root) => JsonLinesSource::with_root(root),
        Err(_) => JsonLinesSource::new(),
    };

    let context = WorkerContext::new(
        config,
        Arc::new(store),
        Arc::new(queue),
        Arc::new(source),
        Arc::new(sink),
        Arc::new(IdentityTransformer),
    );
    let pool = WorkerPool::start(&config.worker, context);
    info!(workers = ?pool.worker_ids(), "Workers running");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let stats = pool.shutdown().await;
    let completed: u64 = stats.iter().map(|s| s.completed).sum();
    let failed: u64 = stats.iter().map(|s| s.failed).sum();
    info!(completed, failed, "Partition worker stopped");

    Ok(())
}
