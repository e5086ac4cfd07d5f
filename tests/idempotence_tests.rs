mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use partition_dispatch::messaging::WorkQueue;
use partition_dispatch::models::{SessionRequest, WorkItem};
use partition_dispatch::state_machine::{SessionStatus, TaskStatus};
use partition_dispatch::store::StateStore;
use partition_dispatch::worker::{SkipReason, TaskOutcome};

#[tokio::test]
async fn duplicate_delivery_of_completed_task_is_skipped() {
    let harness = HarnessBuilder::new()
        .with_records(keyed_records(100, 20))
        .build();
    let session_id = harness
        .coordinator
        .create_session(SessionRequest::new(SOURCE, KEY_FIELD, 100))
        .await
        .unwrap();
    harness.drive(&session_id).await;

    let session = harness.coordinator.get_session(&session_id).await.unwrap();
    let task = harness
        .coordinator
        .list_session_tasks(&session_id)
        .await
        .unwrap()
        .remove(0);
    let outcome = harness
        .worker
        .execute(&WorkItem::for_task(&session, &task))
        .await
        .unwrap();
    assert_eq!(outcome, TaskOutcome::Skipped(SkipReason::AlreadyCompleted));
    assert_eq!(harness.sink.rows_written(), 20);
}

#[tokio::test]
async fn rerunning_a_partition_rewrites_identical_rows() {
    let harness = HarnessBuilder::new()
        .with_records(keyed_records(300, 60))
        .with_flush_threshold(7)
        .build();
    let session_id = harness
        .coordinator
        .create_session(SessionRequest::new(SOURCE, KEY_FIELD, 20))
        .await
        .unwrap();
    harness.drive(&session_id).await;
    let first_pass = harness.sink.snapshot(&session_id);
    assert_eq!(first_pass.len(), 60);

    // Simulate a worker that crashed after writing but before completing
    let session = harness.coordinator.get_session(&session_id).await.unwrap();
    let completed = harness
        .coordinator
        .list_session_tasks(&session_id)
        .await
        .unwrap()
        .remove(0);
    let mut abandoned = completed.clone();
    abandoned.status = TaskStatus::Processing;
    abandoned.worker_id = Some("crashed-worker".to_string());
    abandoned.started_at = Some(Utc::now() - chrono::Duration::hours(2));
    abandoned.finished_at = None;
    abandoned.result = None;
    let abandoned = harness
        .store
        .compare_and_swap_task(&completed, &abandoned)
        .await
        .unwrap()
        .unwrap();

    let outcome = harness
        .worker
        .execute(&WorkItem::for_task(&session, &abandoned))
        .await
        .unwrap();
    let TaskOutcome::Completed(result) = outcome else {
        panic!("expired claim should be taken over, got {outcome:?}");
    };
    assert_eq!(result.unique_records, completed.result.unwrap().unique_records);

    assert_eq!(harness.sink.snapshot(&session_id), first_pass);
    let task = harness
        .coordinator
        .get_task_status(&abandoned.task_id)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.worker_id.as_deref(), Some("test-worker"));
}

#[tokio::test]
async fn lost_queue_items_are_recovered() {
    let harness = HarnessBuilder::new()
        .with_records(keyed_records(200, 40))
        .build();
    let session_id = harness
        .coordinator
        .create_session(SessionRequest::new(SOURCE, KEY_FIELD, 10))
        .await
        .unwrap();

    // Drop one delivery on the floor
    let lost = harness
        .queue
        .receive(Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    harness.queue.ack(&lost.receipt).await.unwrap();

    let outcomes = harness.drive(&session_id).await;
    assert_eq!(outcomes.len(), 3);
    let progress = harness
        .coordinator
        .get_session_status(&session_id)
        .await
        .unwrap();
    assert_eq!(progress.status, SessionStatus::Running);
    assert_eq!(progress.pending, 1);

    let republished = harness
        .coordinator
        .recover_stalled_tasks(&session_id, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(republished, vec![lost.item.task_id.clone()]);

    harness.drive(&session_id).await;
    let progress = harness
        .coordinator
        .get_session_status(&session_id)
        .await
        .unwrap();
    assert_eq!(progress.status, SessionStatus::Completed);
    assert_eq!(harness.sink.snapshot(&session_id).len(), 40);
}

#[tokio::test]
async fn recovery_ignores_finished_sessions() {
    let harness = HarnessBuilder::new()
        .with_records(keyed_records(20, 5))
        .build();
    let session_id = harness
        .coordinator
        .create_session(SessionRequest::new(SOURCE, KEY_FIELD, 100))
        .await
        .unwrap();
    harness.drive(&session_id).await;

    let republished = harness
        .coordinator
        .recover_stalled_tasks(&session_id, Duration::ZERO)
        .await
        .unwrap();
    assert!(republished.is_empty());
    assert!(harness.queue.is_empty());
}
