//! Task state cell and result passing between tasks.
//!
//! - [`TaskCore`]: shared lifecycle state, value slot and cancellation token
//! - [`TaskContext`]: what a running task uses to publish its value and finish
//! - [`Upstream`]: typed read handle a downstream task holds on a predecessor

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::operation::Node;
use super::task::TaskError;
use super::types::{TaskId, TaskState};

type FinishCallback = Box<dyn FnOnce() + Send>;

struct Slot<T> {
    state: TaskState,
    value: Option<T>,
    on_finished: Vec<FinishCallback>,
}

/// Lifecycle state shared between an operation, its context and its handles.
///
/// State and value sit behind one mutex so a value is always visible to
/// anyone who observes `Finished`. Every transition is also published on a
/// watch channel, which is how executors learn about completion.
pub(crate) struct TaskCore<T> {
    id: TaskId,
    name: String,
    slot: Mutex<Slot<T>>,
    state_tx: watch::Sender<TaskState>,
    cancel: CancellationToken,
}

impl<T: Clone + Send + Sync + 'static> TaskCore<T> {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(TaskState::Ready);
        Self {
            id: TaskId::new(),
            name: name.into(),
            slot: Mutex::new(Slot {
                state: TaskState::Ready,
                value: None,
                on_finished: Vec::new(),
            }),
            state_tx,
            cancel: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> TaskState {
        self.lock().state
    }

    pub(crate) fn value(&self) -> Option<T> {
        self.lock().value.clone()
    }

    /// Store the value. Returns false (and leaves the slot untouched) when a
    /// value already exists or the task has finished.
    pub(crate) fn set_value(&self, value: T) -> bool {
        let mut slot = self.lock();
        if slot.state.is_finished() {
            warn!(task = %self.name, "value set after task finished, ignoring");
            return false;
        }
        if slot.value.is_some() {
            warn!(task = %self.name, "value already set, ignoring");
            return false;
        }
        slot.value = Some(value);
        true
    }

    /// Move to `next` if that is a forward transition.
    pub(crate) fn transition(&self, next: TaskState) -> bool {
        let callbacks = {
            let mut slot = self.lock();
            if !slot.state.can_transition_to(next) {
                return false;
            }
            debug!(task = %self.name, from = %slot.state, to = %next, "task state change");
            slot.state = next;
            if next.is_finished() {
                std::mem::take(&mut slot.on_finished)
            } else {
                Vec::new()
            }
        };

        self.state_tx.send_replace(next);
        for callback in callbacks {
            callback();
        }
        true
    }

    pub(crate) fn on_finished(&self, callback: FinishCallback) {
        let mut slot = self.lock();
        if slot.state.is_finished() {
            drop(slot);
            callback();
        } else {
            slot.on_finished.push(callback);
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Handle given to a running task.
///
/// Cheap to clone; deferred tasks move a clone into the future or callback
/// that eventually concludes the work.
pub struct TaskContext<T> {
    core: Arc<TaskCore<T>>,
}

impl<T> Clone for TaskContext<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> TaskContext<T> {
    pub(crate) fn new(core: Arc<TaskCore<T>>) -> Self {
        Self { core }
    }

    /// Id of the task this context belongs to.
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Name of the task this context belongs to.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Check the cancellation flag.
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Resolves once the task is cancelled.
    ///
    /// Racing in-flight work against this future in `tokio::select!` drops
    /// (and thereby aborts) the work as soon as cancellation arrives.
    pub async fn cancelled(&self) {
        self.core.cancellation_token().cancelled().await
    }

    /// Publish the result. Only the first call has an effect.
    pub fn set_value(&self, value: T) -> bool {
        self.core.set_value(value)
    }

    /// Current value, if one was published.
    pub fn value(&self) -> Option<T> {
        self.core.value()
    }

    /// Mark the task finished.
    ///
    /// Required for [`Completion::Deferred`](super::task::Completion::Deferred)
    /// tasks; calling it again is harmless.
    pub fn finish(&self) {
        self.core.transition(TaskState::Finished);
    }
}

impl<T> fmt::Debug for TaskContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .finish()
    }
}

/// Typed handle on the result of another task.
///
/// Obtained from [`Operation::upstream`](super::operation::Operation::upstream).
/// A task that stores an `Upstream` and returns its node from
/// [`Task::predecessors`](super::task::Task::predecessors) is guaranteed to
/// see the upstream value once it runs.
pub struct Upstream<T> {
    core: Arc<TaskCore<T>>,
    node: Arc<dyn Node>,
}

impl<T> Clone for Upstream<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            node: Arc::clone(&self.node),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Upstream<T> {
    pub(crate) fn new(core: Arc<TaskCore<T>>, node: Arc<dyn Node>) -> Self {
        Self { core, node }
    }

    /// Id of the upstream task.
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Name of the upstream task.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Type-erased node, suitable for declaring a dependency.
    pub fn node(&self) -> Arc<dyn Node> {
        Arc::clone(&self.node)
    }

    /// Current state of the upstream task.
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Value published so far, regardless of state.
    pub fn value(&self) -> Option<T> {
        self.core.value()
    }

    /// Value of a finished upstream task.
    ///
    /// Fails with [`TaskError::MissingPredecessor`] if the task is not yet
    /// finished (a wiring bug) or finished without a value (it was
    /// cancelled).
    pub fn finished_value(&self) -> Result<T, TaskError> {
        if !self.core.state().is_finished() {
            return Err(TaskError::MissingPredecessor(format!(
                "'{}' has not finished",
                self.core.name()
            )));
        }
        self.core.value().ok_or_else(|| {
            TaskError::MissingPredecessor(format!("'{}' produced no value", self.core.name()))
        })
    }
}

impl<T> fmt::Debug for Upstream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .finish()
    }
}
