#![allow(dead_code)]

use proptest::prelude::*;

use partition_dispatch::state_machine::TaskStatus;

/// Partition key values, including whitespace padding the hash must ignore
pub fn partition_key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9]{1,24}",
        "SELECT [a-z_]{1,12} FROM [a-z_]{1,12}",
        " {0,2}[A-Za-z0-9]{1,16} {0,2}",
    ]
}

pub fn total_partitions_strategy() -> impl Strategy<Value = u32> {
    1u32..=64
}

/// Task status plus whether a `failed` task is dead-lettered
pub fn task_state_strategy() -> impl Strategy<Value = (TaskStatus, bool)> {
    prop_oneof![
        Just((TaskStatus::Pending, false)),
        Just((TaskStatus::Processing, false)),
        Just((TaskStatus::Completed, false)),
        Just((TaskStatus::Failed, false)),
        Just((TaskStatus::Failed, true)),
    ]
}
