//! Batch integration tests.
//!
//! Tests that verify batches behave as single tasks inside larger graphs.

use crate::common::{wait_for_state, wait_idle};
use std::sync::Arc;
use std::time::Duration;
use tessera::testing::{TrackedTask, Tracker};
use tessera::{BatchTask, Executor, ExecutorConfig, Node, Operation, TaskState};

fn tracked(name: &str, tracker: &Arc<Tracker>, millis: u64) -> Arc<Operation<TrackedTask>> {
    Operation::new(TrackedTask::new(name, tracker, Duration::from_millis(millis)))
}

#[tokio::test]
async fn test_batch_member_order_and_completion() {
    let recorder = Tracker::new();
    let a = tracked("a", &recorder, 30);
    let b = tracked("b", &recorder, 5);
    b.add_dependency(a.clone()).unwrap();

    let batch = Operation::new(
        BatchTask::new(vec![a.clone() as Arc<dyn Node>, b.clone()], |_| {}).unwrap(),
    );
    let executor = Executor::default();
    executor.submit(batch.clone());
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert_eq!(recorder.started(), vec!["a", "b"]);
    assert_eq!(recorder.finished(), vec!["a", "b"]);
    assert_eq!(batch.state(), TaskState::Finished);
    assert_eq!(a.value(), Some("a".to_string()));
    assert_eq!(b.value(), Some("b".to_string()));
}

#[tokio::test]
async fn test_batch_does_not_run_before_its_dependency() {
    let recorder = Tracker::new();
    let gate = tracked("gate", &recorder, 40);
    let inside = tracked("inside", &recorder, 0);

    let members = vec![inside.clone() as Arc<dyn Node>];
    let batch = Operation::new(BatchTask::new(members, |_| {}).unwrap());
    batch.add_dependency(gate.clone()).unwrap();

    let executor = Executor::default();
    executor.submit(batch.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(inside.state(), TaskState::Ready);

    executor.submit(gate.clone());
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert_eq!(recorder.started(), vec!["gate", "inside"]);
}

#[tokio::test]
async fn test_downstream_waits_for_whole_batch() {
    let recorder = Tracker::new();
    let members: Vec<Arc<dyn Node>> = (0..4)
        .map(|i| tracked(&format!("m{i}"), &recorder, 10 + i * 5) as Arc<dyn Node>)
        .collect();
    let batch = Operation::new(
        BatchTask::new(members.clone(), |config| {
            config.max_concurrency = Some(2);
        })
        .unwrap(),
    );
    let after = tracked("after", &recorder, 0);
    after.add_dependency(batch.clone()).unwrap();

    let executor = Executor::default();
    executor.submit_all([after.clone() as Arc<dyn Node>, batch.clone()]);
    wait_idle(&executor, Duration::from_secs(2)).await;

    let started = recorder.started();
    assert_eq!(started.last().map(String::as_str), Some("after"));
    assert_eq!(started.len(), 5);
    assert!(recorder.peak() <= 2);
    assert!(members.iter().all(|m| m.state() == TaskState::Finished));
}

#[tokio::test]
async fn test_empty_batch_in_chain() {
    let recorder = Tracker::new();
    let empty = Operation::new(BatchTask::new(Vec::new(), |_| {}).unwrap());
    let tail = tracked("tail", &recorder, 0);
    tail.add_dependency(empty.clone()).unwrap();

    let executor = Executor::default();
    executor.submit_all([tail.clone() as Arc<dyn Node>, empty.clone()]);
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert_eq!(empty.value(), Some(()));
    assert_eq!(tail.value(), Some("tail".to_string()));
}

#[tokio::test]
async fn test_batch_on_limited_outer_executor_holds_its_slot() {
    let recorder = Tracker::new();
    let inside = tracked("inside", &recorder, 30);
    let members = vec![inside.clone() as Arc<dyn Node>];
    let batch = Operation::new(BatchTask::new(members, |_| {}).unwrap());
    let sibling = tracked("sibling", &recorder, 0);

    let executor = Executor::new(ExecutorConfig::named("outer").with_max_concurrency(1));
    executor.submit(batch.clone());
    executor.submit(sibling.clone());

    wait_for_state(&*inside, TaskState::Executing, Duration::from_secs(1)).await;
    assert_eq!(sibling.state(), TaskState::Ready);

    wait_idle(&executor, Duration::from_secs(2)).await;
    assert_eq!(recorder.started(), vec!["inside", "sibling"]);
}
