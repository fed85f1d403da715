//! Operations: tasks wrapped with lifecycle state and dependencies.
//!
//! [`Operation`] owns a [`Task`] together with its state cell and dependency
//! list. Executors only see the type-erased [`Node`] view, while callers keep
//! the typed `Arc<Operation<W>>` to read results.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::{TaskContext, TaskCore, Upstream};
use super::task::{Completion, Task};
use super::types::{TaskId, TaskState};

/// Errors raised while wiring the task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A task was declared as its own dependency.
    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// Adding the edge would close a cycle.
    #[error("cycle detected: '{from}' depending on '{to}'")]
    CycleDetected { from: String, to: String },

    /// Dependencies are frozen once a task has been submitted.
    #[error("task '{0}' was already submitted")]
    AlreadySubmitted(String),
}

/// Type-erased view of a task used by executors.
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique id of the task.
    fn id(&self) -> TaskId;

    /// Display name of the task.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> TaskState;

    /// Whether cancellation was requested.
    fn is_cancelled(&self) -> bool;

    /// Request cancellation. Safe to call in any state.
    fn cancel(&self);

    /// Token that fires when cancellation is requested.
    fn cancellation(&self) -> CancellationToken;

    /// Completion style of the wrapped task.
    fn completion(&self) -> Completion;

    /// Snapshot of the declared dependencies.
    fn dependencies(&self) -> Vec<Arc<dyn Node>>;

    /// Declare that this task must not run before `dependency` finishes.
    fn add_dependency(&self, dependency: Arc<dyn Node>) -> Result<(), GraphError>;

    /// Watch channel publishing every state transition.
    fn subscribe(&self) -> watch::Receiver<TaskState>;

    /// Claim the task for an executor. Returns false if it was already claimed.
    fn mark_submitted(&self) -> bool;

    /// Whether an executor has claimed the task.
    fn is_submitted(&self) -> bool;

    /// Run the task's start semantics.
    ///
    /// A cancelled task goes straight to `Finished`. Otherwise the task moves
    /// to `Executing` and its work runs; inline tasks are `Finished` when this
    /// returns, deferred tasks finish later.
    async fn start(&self);

    /// `Ready` with every dependency `Finished`.
    fn is_ready(&self) -> bool {
        self.state() == TaskState::Ready
            && self
                .dependencies()
                .iter()
                .all(|dep| dep.state().is_finished())
    }
}

/// Wait until `node` reaches `Finished`.
pub async fn wait_finished(node: &dyn Node) {
    let mut rx = node.subscribe();
    // The sender lives as long as the node, so an error cannot happen while
    // we hold a reference to it.
    let _ = rx.wait_for(|state| state.is_finished()).await;
}

/// Whether `target` is reachable from `from` by following dependencies.
fn reaches(from: &Arc<dyn Node>, target: TaskId) -> bool {
    let mut stack = vec![Arc::clone(from)];
    let mut visited = HashSet::new();

    while let Some(node) = stack.pop() {
        if node.id() == target {
            return true;
        }
        if !visited.insert(node.id()) {
            continue;
        }
        stack.extend(node.dependencies());
    }
    false
}

/// A task together with its lifecycle state and dependencies.
pub struct Operation<W: Task> {
    work: W,
    core: Arc<TaskCore<W::Output>>,
    dependencies: Mutex<Vec<Arc<dyn Node>>>,
    submitted: AtomicBool,
}

impl<W: Task> Operation<W> {
    /// Wrap `work` in a new operation.
    ///
    /// The work's [`predecessors`](Task::predecessors) become the initial
    /// dependencies.
    pub fn new(work: W) -> Arc<Self> {
        let core = Arc::new(TaskCore::new(work.name()));
        let dependencies = work.predecessors();
        Arc::new(Self {
            work,
            core,
            dependencies: Mutex::new(dependencies),
            submitted: AtomicBool::new(false),
        })
    }

    /// Unique id.
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Display name.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Result published by the task, if any.
    pub fn value(&self) -> Option<W::Output> {
        self.core.value()
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Access the wrapped work.
    pub fn work(&self) -> &W {
        &self.work
    }

    /// Typed handle for downstream tasks that consume this task's value.
    pub fn upstream(self: &Arc<Self>) -> Upstream<W::Output> {
        let node: Arc<dyn Node> = Arc::clone(self) as Arc<dyn Node>;
        Upstream::new(Arc::clone(&self.core), node)
    }

    /// Declare several dependencies at once.
    pub fn add_dependencies(
        &self,
        dependencies: impl IntoIterator<Item = Arc<dyn Node>>,
    ) -> Result<(), GraphError> {
        for dependency in dependencies {
            Node::add_dependency(self, dependency)?;
        }
        Ok(())
    }

    /// Run `callback` once the task finishes; immediately if it already has.
    ///
    /// Callbacks run on whichever thread performs the final transition.
    pub fn on_finished(&self, callback: impl FnOnce() + Send + 'static) {
        self.core.on_finished(Box::new(callback));
    }

    /// Wait for the task to finish and return its value.
    pub async fn wait(&self) -> Option<W::Output> {
        wait_finished(self).await;
        self.core.value()
    }
}

#[async_trait]
impl<W: Task> Node for Operation<W> {
    fn id(&self) -> TaskId {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    fn cancel(&self) {
        if self.core.state().is_finished() {
            debug!(task = %self.name(), "cancel after finish has no effect on the value");
        }
        self.core.cancel();
        self.work.on_cancel();
    }

    fn cancellation(&self) -> CancellationToken {
        self.core.cancellation_token().clone()
    }

    fn completion(&self) -> Completion {
        self.work.completion()
    }

    fn dependencies(&self) -> Vec<Arc<dyn Node>> {
        self.dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn add_dependency(&self, dependency: Arc<dyn Node>) -> Result<(), GraphError> {
        if self.submitted.load(Ordering::SeqCst) {
            return Err(GraphError::AlreadySubmitted(self.name().to_string()));
        }
        if dependency.id() == self.id() {
            return Err(GraphError::SelfDependency(self.name().to_string()));
        }
        if reaches(&dependency, self.id()) {
            return Err(GraphError::CycleDetected {
                from: self.name().to_string(),
                to: dependency.name().to_string(),
            });
        }

        let mut dependencies = self
            .dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !dependencies.iter().any(|dep| dep.id() == dependency.id()) {
            dependencies.push(dependency);
        }
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.core.subscribe()
    }

    fn mark_submitted(&self) -> bool {
        !self.submitted.swap(true, Ordering::SeqCst)
    }

    fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::SeqCst)
    }

    async fn start(&self) {
        if self.core.is_cancelled() {
            debug!(task = %self.name(), "cancelled before start, finishing without work");
            self.core.transition(TaskState::Finished);
            return;
        }

        if !self.core.transition(TaskState::Executing) {
            warn!(task = %self.name(), state = %self.state(), "task already started");
            return;
        }

        let ctx = TaskContext::new(Arc::clone(&self.core));
        self.work.execute(&ctx).await;

        if self.work.completion() == Completion::Inline {
            self.core.transition(TaskState::Finished);
        }
    }
}

impl<W: Task> fmt::Debug for Operation<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
