//! Lifecycle events and event handling.
//!
//! Executors emit an event when a task is submitted, when it is started and
//! when it finishes, giving observability into graph execution without
//! touching the tasks themselves.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::TaskId;

/// Lifecycle events emitted by an executor.
#[derive(Debug, Clone)]
pub enum Event {
    /// A task was accepted by an executor.
    TaskSubmitted {
        task_id: TaskId,
        name: String,
        executor: String,
        timestamp: Instant,
    },

    /// A task's dependencies finished and it was started.
    TaskStarted {
        task_id: TaskId,
        name: String,
        executor: String,
        timestamp: Instant,
    },

    /// A task reached `Finished`.
    TaskFinished {
        task_id: TaskId,
        name: String,
        executor: String,
        /// Whether cancellation had been requested by the time it finished.
        cancelled: bool,
        /// Time between start and finish.
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::TaskSubmitted { timestamp, .. } => *timestamp,
            Event::TaskStarted { timestamp, .. } => *timestamp,
            Event::TaskFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Id of the task the event is about.
    pub fn task_id(&self) -> TaskId {
        match self {
            Event::TaskSubmitted { task_id, .. } => *task_id,
            Event::TaskStarted { task_id, .. } => *task_id,
            Event::TaskFinished { task_id, .. } => *task_id,
        }
    }

    /// Create a TaskSubmitted event.
    pub fn task_submitted(
        task_id: TaskId,
        name: impl Into<String>,
        executor: impl Into<String>,
    ) -> Self {
        Event::TaskSubmitted {
            task_id,
            name: name.into(),
            executor: executor.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(
        task_id: TaskId,
        name: impl Into<String>,
        executor: impl Into<String>,
    ) -> Self {
        Event::TaskStarted {
            task_id,
            name: name.into(),
            executor: executor.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFinished event.
    pub fn task_finished(
        task_id: TaskId,
        name: impl Into<String>,
        executor: impl Into<String>,
        cancelled: bool,
        duration: Duration,
    ) -> Self {
        Event::TaskFinished {
            task_id,
            name: name.into(),
            executor: executor.into(),
            cancelled,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Test handler that records received events.
    struct RecordingHandler {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        async fn events(&self) -> Vec<Event> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &Event) {
            self.events.lock().await.push(event.clone());
        }
    }

    struct CountingHandler {
        count: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_emit_task_started_event() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        let id = TaskId::new();
        bus.emit(Event::task_started(id, "fetch", "network")).await;

        let events = handler.events().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::TaskStarted {
                task_id,
                name,
                executor,
                ..
            } => {
                assert_eq!(*task_id, id);
                assert_eq!(name, "fetch");
                assert_eq!(executor, "network");
            }
            _ => panic!("Expected TaskStarted event"),
        }
    }

    #[tokio::test]
    async fn test_emit_task_finished_event_with_duration() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        let duration = Duration::from_millis(150);
        bus.emit(Event::task_finished(TaskId::new(), "decode", "main", true, duration))
            .await;

        let events = handler.events().await;
        match &events[0] {
            Event::TaskFinished {
                cancelled,
                duration: d,
                ..
            } => {
                assert!(*cancelled);
                assert_eq!(*d, duration);
            }
            _ => panic!("Expected TaskFinished event"),
        }
    }

    #[tokio::test]
    async fn test_multiple_handlers_receive_every_event() {
        let counter = Arc::new(CountingHandler {
            count: AtomicU32::new(0),
        });
        let recorder = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(counter.clone()).await;
        bus.register(recorder.clone()).await;
        assert_eq!(bus.handler_count().await, 2);

        let id = TaskId::new();
        bus.emit(Event::task_submitted(id, "write", "io")).await;
        bus.emit(Event::task_started(id, "write", "io")).await;

        assert_eq!(counter.count.load(Ordering::SeqCst), 2);
        let events = recorder.events().await;
        assert!(events.iter().all(|e| e.task_id() == id));
        assert!(events[0].timestamp() <= events[1].timestamp());
    }

    #[tokio::test]
    async fn test_emit_without_handlers_is_noop() {
        let bus = EventBus::default();
        bus.emit(Event::task_submitted(TaskId::new(), "noop", "main"))
            .await;
        assert_eq!(bus.handler_count().await, 0);
    }
}
