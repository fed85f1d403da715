//! Concurrency integration tests.
//!
//! Tests that verify limits, dispatch order and the activity indicator under
//! load.

use crate::common::wait_idle;
use std::sync::Arc;
use std::time::Duration;
use tessera::testing::{TrackedTask, Tracker};
use tessera::{
    ActivityIndicator, Executor, ExecutorConfig, Node, Operation, QualityOfService,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_limit_never_exceeded_under_load() {
    for limit in [1usize, 2, 3] {
        let recorder = Tracker::new();
        let executor = Executor::new(ExecutorConfig::named("limited").with_max_concurrency(limit));
        for i in 0..12 {
            let task = TrackedTask::new(format!("t{i}"), &recorder, Duration::from_millis(10));
            let task = if i % 2 == 0 { task.deferred() } else { task };
            executor.submit(Operation::new(task));
        }
        wait_idle(&executor, Duration::from_secs(5)).await;

        assert_eq!(recorder.finished().len(), 12);
        assert!(recorder.peak() <= limit, "peak {} over limit {limit}", recorder.peak());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unbounded_executor_runs_in_parallel() {
    let recorder = Tracker::new();
    let executor = Executor::default();
    for i in 0..8 {
        executor.submit(Operation::new(TrackedTask::new(
            format!("t{i}"),
            &recorder,
            Duration::from_millis(50),
        )));
    }
    wait_idle(&executor, Duration::from_secs(5)).await;

    assert!(recorder.peak() > 1);
}

#[tokio::test]
async fn test_fifo_among_ready_tasks() {
    let recorder = Tracker::new();
    let executor = Executor::new(
        ExecutorConfig::named("serial")
            .with_max_concurrency(1)
            .with_quality_of_service(QualityOfService::Utility),
    );
    let root = Operation::new(TrackedTask::new("root", &recorder, Duration::from_millis(20)));
    executor.submit(root.clone());

    // All unblock at once when root finishes; submission order must win.
    for name in ["x", "y", "z"] {
        let op = Operation::new(TrackedTask::new(name, &recorder, Duration::ZERO));
        op.add_dependency(root.clone()).unwrap();
        executor.submit(op);
    }
    wait_idle(&executor, Duration::from_secs(2)).await;

    assert_eq!(recorder.started(), vec!["root", "x", "y", "z"]);
}

#[tokio::test]
async fn test_diamond_graph() {
    let recorder = Tracker::new();
    let top = Operation::new(TrackedTask::new("top", &recorder, Duration::from_millis(5)));
    let left = Operation::new(TrackedTask::new("left", &recorder, Duration::from_millis(20)));
    let right = Operation::new(TrackedTask::new("right", &recorder, Duration::from_millis(5)));
    let bottom = Operation::new(TrackedTask::new("bottom", &recorder, Duration::ZERO));
    left.add_dependency(top.clone()).unwrap();
    right.add_dependency(top.clone()).unwrap();
    bottom
        .add_dependencies([left.clone() as Arc<dyn Node>, right.clone()])
        .unwrap();

    let executor = Executor::default();
    executor.submit_all([
        bottom.clone() as Arc<dyn Node>,
        right.clone(),
        left.clone(),
        top.clone(),
    ]);
    wait_idle(&executor, Duration::from_secs(2)).await;

    let started = recorder.started();
    assert_eq!(started.first().map(String::as_str), Some("top"));
    assert_eq!(started.last().map(String::as_str), Some("bottom"));
    assert_eq!(recorder.finished().last().map(String::as_str), Some("bottom"));
}

#[tokio::test]
async fn test_activity_indicator_spans_the_whole_graph() {
    let indicator = ActivityIndicator::with_grace(Duration::from_millis(20));
    let recorder = Tracker::new();
    let executor = Executor::network(
        ExecutorConfig::named("network").with_max_concurrency(2),
        Arc::new(indicator.clone()),
    );

    for i in 0..4 {
        executor.submit(Operation::new(TrackedTask::new(
            format!("req{i}"),
            &recorder,
            Duration::from_millis(10),
        )));
    }
    assert_eq!(indicator.active_count(), 4);
    assert!(indicator.is_visible());

    wait_idle(&executor, Duration::from_secs(2)).await;
    assert_eq!(indicator.active_count(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!indicator.is_visible());
}
