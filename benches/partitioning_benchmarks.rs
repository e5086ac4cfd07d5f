//! Partitioning Benchmarks
//!
//! Hot paths of a worker scan: key hashing, the membership predicate, and the
//! per-task batch dictionary.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use partition_dispatch::models::{Task, TaskCounts};
use partition_dispatch::partitioning::{belongs_to, hash_key, partition_for};
use partition_dispatch::source::Record;
use partition_dispatch::worker::BatchBuffer;
use serde_json::json;

fn keys(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("SELECT * FROM events WHERE id = {i}"))
        .collect()
}

fn benchmark_hashing(c: &mut Criterion) {
    let keys = keys(1_000);

    c.bench_function("hash_key", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(hash_key(black_box(key)));
            }
        })
    });

    let mut group = c.benchmark_group("partition_for");
    for total in [1u32, 16, 1_024] {
        group.bench_with_input(BenchmarkId::from_parameter(total), &total, |b, &total| {
            b.iter(|| {
                for key in &keys {
                    black_box(partition_for(key, total));
                }
            })
        });
    }
    group.finish();

    c.bench_function("belongs_to_scan", |b| {
        b.iter(|| keys.iter().filter(|key| belongs_to(key, 3, 8)).count())
    });
}

fn benchmark_batch_buffer(c: &mut Criterion) {
    let keys = keys(5_000);
    let record = match json!({"query": "select 1", "dialect": "hive"}) {
        serde_json::Value::Object(fields) => Record::new(fields),
        _ => unreachable!(),
    };

    c.bench_function("batch_buffer_fill_and_drain", |b| {
        b.iter(|| {
            let mut buffer = BatchBuffer::new(1_000);
            let mut flushed = 0;
            for key in &keys {
                if buffer.insert(key.clone(), record.clone()) {
                    flushed += buffer.drain().len();
                }
            }
            flushed + buffer.drain().len()
        })
    });
}

fn benchmark_progress_counts(c: &mut Criterion) {
    let now = Utc::now();
    let tasks: Vec<Task> = (0..10_000)
        .map(|remainder| Task::new("bench_session", remainder, 10_000, 3, now))
        .collect();

    c.bench_function("task_counts_10k", |b| {
        b.iter(|| TaskCounts::from_tasks(black_box(&tasks)))
    });
}

criterion_group!(
    benches,
    benchmark_hashing,
    benchmark_batch_buffer,
    benchmark_progress_counts
);
criterion_main!(benches);
