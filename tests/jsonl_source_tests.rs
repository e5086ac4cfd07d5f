mod common;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use common::*;
use partition_dispatch::models::SessionRequest;
use partition_dispatch::source::JsonLinesSource;
use partition_dispatch::state_machine::SessionStatus;
use partition_dispatch::DispatchError;

fn write_queries(path: &Path, range: std::ops::Range<usize>, distinct: usize) {
    let mut file = std::fs::File::create(path).unwrap();
    for i in range {
        writeln!(
            file,
            r#"{{"query_hash": "q{:04}", "query": "select {i}"}}"#,
            i % distinct
        )
        .unwrap();
    }
    writeln!(file).unwrap();
}

#[tokio::test]
async fn directory_of_files_is_processed_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_queries(&dir.path().join("part-000.jsonl"), 0..50, 30);
    write_queries(&dir.path().join("part-001.jsonl"), 50..100, 30);
    write_queries(&dir.path().join("part-002.jsonl"), 100..150, 30);

    let harness = HarnessBuilder::new()
        .with_source(Arc::new(JsonLinesSource::with_root(dir.path())))
        .build();
    let session_id = harness
        .coordinator
        .create_session(SessionRequest::new(".", KEY_FIELD, 10))
        .await
        .unwrap();

    let session = harness.coordinator.get_session(&session_id).await.unwrap();
    assert_eq!(session.plan.as_ref().unwrap().partition_count, 3);

    harness.drive(&session_id).await;
    let progress = harness
        .coordinator
        .get_session_status(&session_id)
        .await
        .unwrap();
    assert_eq!(progress.status, SessionStatus::Completed);
    assert_eq!(harness.sink.snapshot(&session_id).len(), 30);

    let scanned: u64 = harness
        .coordinator
        .list_session_tasks(&session_id)
        .await
        .unwrap()
        .iter()
        .map(|task| task.result.as_ref().unwrap().records_scanned)
        .sum();
    // Every task scans the whole source
    assert_eq!(scanned, 3 * 150);
}

#[tokio::test]
async fn malformed_line_fails_planning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jsonl");
    std::fs::write(&path, "{\"query_hash\": \"a\"}\nnot json\n").unwrap();

    let harness = HarnessBuilder::new()
        .with_source(Arc::new(JsonLinesSource::new()))
        .build();
    let err = harness
        .coordinator
        .create_session(SessionRequest::new(
            path.to_str().unwrap(),
            KEY_FIELD,
            10,
        ))
        .await
        .unwrap_err();
    let DispatchError::Planning { session_id, reason } = err else {
        panic!("expected a planning failure, got {err:?}");
    };
    assert!(reason.contains("broken.jsonl:2"));

    let session = harness.coordinator.get_session(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
}

#[tokio::test]
async fn missing_path_fails_planning() {
    let dir = tempfile::tempdir().unwrap();
    let harness = HarnessBuilder::new()
        .with_source(Arc::new(JsonLinesSource::with_root(dir.path())))
        .build();
    let err = harness
        .coordinator
        .create_session(SessionRequest::new("does-not-exist", KEY_FIELD, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Planning { .. }));
}
