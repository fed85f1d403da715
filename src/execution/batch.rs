//! Composite tasks.
//!
//! A [`BatchTask`] runs a group of member tasks on its own private executor
//! and presents the whole group to an outer executor as one task. Two
//! synthetic [`BlockTask`] barriers fence the group: every member depends on
//! the start barrier, and the finish barrier depends on every member. The
//! sub-executor is built suspended and the finish barrier is only submitted
//! when the batch itself starts, so nothing in the group runs early.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, warn};

use super::executor::Executor;
use crate::config::ExecutorConfig;
use crate::core::context::TaskContext;
use crate::core::operation::{GraphError, Node, Operation, wait_finished};
use crate::core::task::{Completion, Task};

/// Default name for a batch and its sub-executor.
pub const DEFAULT_BATCH_NAME: &str = "tessera.batch";

type Block<T> = Box<dyn FnOnce() -> T + Send>;

/// Inline task that runs a closure once and stores its result.
pub struct BlockTask<T = ()> {
    name: String,
    block: Mutex<Option<Block<T>>>,
}

impl<T> BlockTask<T> {
    /// Task running `block` when started.
    pub fn new(name: impl Into<String>, block: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            name: name.into(),
            block: Mutex::new(Some(Box::new(block))),
        }
    }
}

impl BlockTask<()> {
    /// Task that does nothing. Useful as a fence in a dependency graph.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, || ())
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Task for BlockTask<T> {
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &TaskContext<T>) {
        let block = self
            .block
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(block) = block {
            ctx.set_value(block());
        }
    }
}

impl<T> fmt::Debug for BlockTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockTask").field("name", &self.name).finish()
    }
}

/// A group of tasks exposed as a single deferred task.
///
/// The batch value is `()` unless built with [`BatchTask::with_output`].
/// Members must not be submitted anywhere else.
pub struct BatchTask<T = ()> {
    name: String,
    executor: Executor,
    members: Vec<Arc<dyn Node>>,
    finish_barrier: Arc<dyn Node>,
    finisher: Arc<OnceLock<TaskContext<T>>>,
}

impl BatchTask<()> {
    /// Group `members` behind a single task.
    ///
    /// `configure` adjusts the sub-executor configuration (name, concurrency,
    /// quality of service). The sub-executor is always built suspended.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(
        members: Vec<Arc<dyn Node>>,
        configure: impl FnOnce(&mut ExecutorConfig),
    ) -> Result<Self, GraphError> {
        Self::with_output(members, configure, || ())
    }
}

impl<T: Clone + Send + Sync + 'static> BatchTask<T> {
    /// Like [`BatchTask::new`], with the batch value produced by `collect`
    /// once every member has finished.
    pub fn with_output(
        members: Vec<Arc<dyn Node>>,
        configure: impl FnOnce(&mut ExecutorConfig),
        collect: impl FnOnce() -> T + Send + 'static,
    ) -> Result<Self, GraphError> {
        let mut config = ExecutorConfig::named(DEFAULT_BATCH_NAME);
        configure(&mut config);
        config.suspended = true;
        let name = config.name.clone();

        let start_barrier = Operation::new(BlockTask::noop(format!("{name}.start")));
        let finisher: Arc<OnceLock<TaskContext<T>>> = Arc::new(OnceLock::new());
        let finish_barrier = {
            let finisher = Arc::clone(&finisher);
            Operation::new(BlockTask::new(format!("{name}.finish"), move || {
                if let Some(ctx) = finisher.get() {
                    if !ctx.is_cancelled() {
                        ctx.set_value(collect());
                    }
                    ctx.finish();
                }
            }))
        };

        // Members are left untouched unless every one of them can be fenced.
        if let Some(claimed) = members.iter().find(|member| member.is_submitted()) {
            return Err(GraphError::AlreadySubmitted(claimed.name().to_string()));
        }

        for member in &members {
            member.add_dependency(start_barrier.clone())?;
            finish_barrier.add_dependency(Arc::clone(member))?;
        }
        finish_barrier.add_dependency(start_barrier.clone())?;

        let executor = Executor::new(config);
        executor.submit(start_barrier);
        executor.submit_all(members.iter().cloned());

        debug!(batch = %name, members = members.len(), "batch prepared");

        Ok(Self {
            name,
            executor,
            members,
            finish_barrier,
            finisher,
        })
    }

    /// The private sub-executor.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Member tasks, in the order given.
    pub fn members(&self) -> &[Arc<dyn Node>] {
        &self.members
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Task for BatchTask<T> {
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn completion(&self) -> Completion {
        Completion::Deferred
    }

    async fn execute(&self, ctx: &TaskContext<T>) {
        if self.finisher.set(ctx.clone()).is_err() {
            warn!(batch = %self.name, "batch already activated");
            return;
        }

        debug!(batch = %self.name, "activating batch");
        self.executor.resume();
        self.executor.submit(Arc::clone(&self.finish_barrier));
        if ctx.is_cancelled() {
            self.executor.cancel_all();
        }

        // A cancelled finish barrier never runs its block; finish the batch
        // from here in that case.
        let barrier = Arc::clone(&self.finish_barrier);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            wait_finished(barrier.as_ref()).await;
            ctx.finish();
        });
    }

    fn on_cancel(&self) {
        self.executor.cancel_all();
    }
}

impl<T> fmt::Debug for BatchTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchTask")
            .field("name", &self.name)
            .field("members", &self.members.len())
            .finish()
    }
}
