//! Cancellation integration tests.
//!
//! Tests that verify cancellation reaches queued, running and nested work
//! and that cancelled graphs still drain.

use crate::common::{wait_for_state, wait_idle};
use std::sync::Arc;
use std::time::Duration;
use tessera::testing::{MockTransport, TrackedTask, Tracker};
use tessera::{
    BatchTask, DecodeTask, Executor, ExecutorConfig, FetchTask, Node, Operation, Request,
    TaskError, TaskState, WriteContent, WriteTask,
};

#[tokio::test]
async fn test_cancelled_dependency_still_unblocks_dependents() {
    let recorder = Tracker::new();
    let first = Operation::new(TrackedTask::new("first", &recorder, Duration::from_millis(10)));
    let second = Operation::new(TrackedTask::new("second", &recorder, Duration::from_millis(10)));
    second.add_dependency(first.clone()).unwrap();

    first.cancel();
    let executor = Executor::default();
    executor.submit_all([first.clone() as Arc<dyn Node>, second.clone()]);
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert_eq!(first.state(), TaskState::Finished);
    assert_eq!(first.value(), None);
    assert_eq!(second.value(), Some("second".to_string()));
    assert_eq!(recorder.started(), vec!["second"]);
}

#[tokio::test]
async fn test_cancel_all_on_suspended_executor() {
    let recorder = Tracker::new();
    let executor = Executor::new(ExecutorConfig::named("held").suspended());
    let ops: Vec<_> = (0..3)
        .map(|i| Operation::new(TrackedTask::new(format!("t{i}"), &recorder, Duration::ZERO)))
        .collect();
    for op in &ops {
        executor.submit(op.clone());
    }

    executor.cancel_all();
    executor.resume();
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert!(recorder.started().is_empty());
    assert!(ops.iter().all(|op| op.is_cancelled() && op.value().is_none()));
}

#[tokio::test]
async fn test_cancel_fetch_stops_decode() {
    let transport = Arc::new(
        MockTransport::new()
            .respond("slow", br#"{"ok":true}"#.to_vec())
            .with_latency(Duration::from_secs(5)),
    );
    let fetch = Operation::new(FetchTask::new(transport, Request::get("slow")));
    let decode = Operation::new(DecodeTask::<serde_json::Value>::new(fetch.upstream()));

    let executor = Executor::default();
    executor.submit_all([fetch.clone() as Arc<dyn Node>, decode.clone()]);
    wait_for_state(&*fetch, TaskState::Executing, Duration::from_secs(1)).await;

    executor.cancel_all();
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert_eq!(fetch.value(), Some(Err(TaskError::Cancelled)));
    assert_eq!(decode.value(), None);
}

#[tokio::test]
async fn test_cancel_batch_through_outer_executor() {
    let recorder = Tracker::new();
    let long =
        Operation::new(TrackedTask::new("long", &recorder, Duration::from_secs(5)).deferred());
    let next = Operation::new(TrackedTask::new("next", &recorder, Duration::ZERO));
    next.add_dependency(long.clone()).unwrap();

    let batch = Operation::new(
        BatchTask::new(vec![long.clone() as Arc<dyn Node>, next.clone()], |_| {}).unwrap(),
    );
    let executor = Executor::default();
    executor.submit(batch.clone());
    wait_for_state(&*long, TaskState::Executing, Duration::from_secs(1)).await;

    executor.cancel_all();
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert!(batch.is_cancelled());
    assert_eq!(batch.state(), TaskState::Finished);
    assert!(long.is_cancelled());
    assert_eq!(recorder.started(), vec!["long"]);
    assert!(recorder.finished().is_empty());
}

#[tokio::test]
async fn test_cancel_mid_stream_write_keeps_prefix() {
    use tokio::io::AsyncWriteExt;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("stream.bin");
    let (mut tx, rx) = tokio::io::duplex(1024);
    let write = Operation::new(
        WriteTask::new(WriteContent::Stream(Box::new(rx)), &destination).with_high_water_mark(8),
    );

    let executor = Executor::default();
    executor.submit(write.clone());
    tx.write_all(b"abcdefgh").await.unwrap();
    for _ in 0..100 {
        if std::fs::metadata(&destination).map(|m| m.len()).unwrap_or(0) == 8 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    executor.cancel_all();
    wait_idle(&executor, Duration::from_secs(2)).await;
    drop(tx);

    assert_eq!(write.value(), Some(Err(TaskError::Cancelled)));
    let written = std::fs::read(&destination).unwrap();
    assert!(b"abcdefgh".starts_with(&written));
}

#[tokio::test]
async fn test_cancel_after_finish_keeps_value() {
    let recorder = Tracker::new();
    let op = Operation::new(TrackedTask::new("done", &recorder, Duration::ZERO));
    let executor = Executor::default();
    executor.submit(op.clone());
    wait_idle(&executor, Duration::from_secs(2)).await;

    op.cancel();
    assert!(op.is_cancelled());
    assert_eq!(op.value(), Some("done".to_string()));
}
