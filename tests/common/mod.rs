//! Common test utilities shared across integration tests.

use std::sync::Arc;
use std::time::Duration;
use tessera::{Event, EventHandler, Executor, Node, TaskState};
use tokio::sync::Mutex;

/// Wait for an executor to drain, failing the test after `timeout`.
///
/// # Panics
///
/// Panics if the executor still holds work when the timeout is reached.
pub async fn wait_idle(executor: &Executor, timeout: Duration) {
    if tokio::time::timeout(timeout, executor.wait_idle()).await.is_err() {
        panic!(
            "Timeout waiting for executor '{}' to drain, {} task(s) left",
            executor.name(),
            executor.task_count()
        );
    }
}

/// Poll until `node` reaches `state`.
///
/// # Panics
///
/// Panics if the state is not reached within `timeout`.
pub async fn wait_for_state(node: &dyn Node, state: TaskState, timeout: Duration) {
    let start = tokio::time::Instant::now();
    while node.state() != state {
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for '{}' to reach {}, current state: {}",
                node.name(),
                state,
                node.state()
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Recording event handler for verifying events.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn started_names(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::TaskStarted { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
