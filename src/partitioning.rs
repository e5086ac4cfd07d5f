//! # Hash Partitioning
//!
//! A record with key `k` belongs to the task whose remainder equals
//! `hash(k) mod total_partitions`. The hash must be identical across
//! processes, restarts, and releases, so it is xxh3-64 over the trimmed UTF-8
//! key with a zero seed rather than the std `DefaultHasher`, whose output is
//! not guaranteed stable.

use xxhash_rust::xxh3::xxh3_64;

/// Normalise a raw key value; `None` for blank keys
pub fn normalize_key(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Stable 64-bit hash of a partition key
pub fn hash_key(key: &str) -> u64 {
    xxh3_64(key.trim().as_bytes())
}

/// Remainder owning `key` when the session is split `total_partitions` ways.
///
/// `total_partitions` of zero is treated as one partition.
pub fn partition_for(key: &str, total_partitions: u32) -> u32 {
    let total = u64::from(total_partitions.max(1));
    // Lossless: the result is strictly below a u32 value.
    (hash_key(key) % total) as u32
}

pub fn belongs_to(key: &str, remainder: u32, total_partitions: u32) -> bool {
    partition_for(key, total_partitions) == remainder
}

/// Number of partitions for a source with `distinct_keys` unique keys
pub fn partition_count(distinct_keys: u64, target_partition_size: u64) -> u32 {
    let count = distinct_keys / target_partition_size.max(1);
    u32::try_from(count).unwrap_or(u32::MAX).max(1)
}
