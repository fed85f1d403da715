//! Task execution engine.
//!
//! The `Executor` accepts tasks and runs each one once all of its declared
//! dependencies have finished:
//! - Ready tasks are dispatched in submission order
//! - At most `max_concurrency` tasks run between dispatch and finish
//! - A suspended executor accepts work but dispatches nothing
//! - `cancel_all` cancels every task it still holds
//!
//! Every submitted task gets a small watcher future that waits on its
//! dependencies' state channels. Dependencies may live on other executors.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::activity::ActivityObserver;
use crate::config::ExecutorConfig;
use crate::core::operation::{Node, wait_finished};
use crate::core::types::TaskId;
use crate::events::{Event, EventBus};

#[derive(Default)]
struct Queue {
    suspended: bool,
    running: usize,
    /// Tasks whose dependencies finished, keyed by submission sequence.
    ready: BTreeMap<u64, Arc<dyn Node>>,
    /// Every task submitted and not yet finished.
    tasks: HashMap<TaskId, Arc<dyn Node>>,
}

struct Shared {
    config: ExecutorConfig,
    limit: Option<usize>,
    queue: Mutex<Queue>,
    outstanding: watch::Sender<usize>,
    next_seq: AtomicU64,
    shutdown: CancellationToken,
    events: Option<Arc<EventBus>>,
    activity: Option<Arc<dyn ActivityObserver>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(self: &Arc<Self>, task: Arc<dyn Node>) {
        if !task.mark_submitted() {
            warn!(
                executor = %self.config.name,
                task = %task.name(),
                "task already submitted, ignoring"
            );
            return;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        {
            let mut queue = self.lock();
            queue.tasks.insert(task.id(), Arc::clone(&task));
            self.outstanding.send_replace(queue.tasks.len());
        }

        debug!(executor = %self.config.name, task = %task.name(), seq, "task submitted");

        if let Some(activity) = &self.activity {
            activity.work_started();
        }
        if let Some(bus) = &self.events {
            let bus = Arc::clone(bus);
            let event = Event::task_submitted(task.id(), task.name(), self.config.name.as_str());
            tokio::spawn(async move { bus.emit(event).await });
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let dependencies = task.dependencies();
            let all_finished = async {
                for dependency in &dependencies {
                    wait_finished(dependency.as_ref()).await;
                }
            };
            let cancellation = task.cancellation();
            tokio::select! {
                _ = shared.shutdown.cancelled() => return,
                _ = cancellation.cancelled() => {
                    debug!(task = %task.name(), "cancelled while waiting on dependencies");
                    Arc::clone(&shared).skip(task).await;
                    return;
                }
                _ = all_finished => {}
            }
            shared.enqueue_ready(seq, Arc::clone(&task));

            // A queued task cancelled later must not wait for a slot.
            tokio::select! {
                _ = shared.shutdown.cancelled() => {}
                _ = wait_finished(task.as_ref()) => {}
                _ = cancellation.cancelled() => shared.pump(),
            }
        });
    }

    fn enqueue_ready(self: &Arc<Self>, seq: u64, task: Arc<dyn Node>) {
        self.lock().ready.insert(seq, task);
        self.pump();
    }

    /// Dispatch ready tasks while the executor is active and under its limit.
    ///
    /// Cancelled tasks are finished immediately without taking a slot.
    fn pump(self: &Arc<Self>) {
        let (dispatch, skipped) = {
            let mut queue = self.lock();
            let skipped: Vec<Arc<dyn Node>> = {
                let cancelled: Vec<u64> = queue
                    .ready
                    .iter()
                    .filter(|(_, task)| task.is_cancelled())
                    .map(|(seq, _)| *seq)
                    .collect();
                cancelled
                    .into_iter()
                    .filter_map(|seq| queue.ready.remove(&seq))
                    .collect()
            };

            let mut dispatch = Vec::new();
            while !queue.suspended && self.limit.is_none_or(|limit| queue.running < limit) {
                let Some((_, task)) = queue.ready.pop_first() else {
                    break;
                };
                queue.running += 1;
                dispatch.push(task);
            }
            (dispatch, skipped)
        };

        for task in skipped {
            tokio::spawn(Arc::clone(self).skip(task));
        }
        for task in dispatch {
            tokio::spawn(Arc::clone(self).run(task));
        }
    }

    /// Finish a cancelled task that never got a slot.
    async fn skip(self: Arc<Self>, task: Arc<dyn Node>) {
        task.start().await;
        self.emit(Event::task_finished(
            task.id(),
            task.name(),
            self.config.name.as_str(),
            true,
            Duration::ZERO,
        ))
        .await;
        self.forget(task.id());
    }

    async fn run(self: Arc<Self>, task: Arc<dyn Node>) {
        let span = info_span!(
            "task",
            executor = %self.config.name,
            task = %task.name(),
            id = %task.id(),
        );

        async {
            if self.config.quality_of_service.yields_before_start() {
                tokio::task::yield_now().await;
            }

            let started = Instant::now();
            if task.is_cancelled() {
                debug!("cancelled before dispatch, finishing without work");
            } else {
                self.emit(Event::task_started(task.id(), task.name(), self.config.name.as_str()))
                    .await;
                debug!("starting task");
            }

            task.start().await;

            if !task.state().is_finished() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        debug!("executor dropped with task in flight");
                        return;
                    }
                    _ = wait_finished(task.as_ref()) => {}
                }
            }

            let duration = started.elapsed();
            let cancelled = task.is_cancelled();
            debug!(cancelled, duration_ms = %duration.as_millis(), "task finished");

            self.emit(Event::task_finished(
                task.id(),
                task.name(),
                self.config.name.as_str(),
                cancelled,
                duration,
            ))
            .await;
            self.complete(task.id());
        }
        .instrument(span)
        .await
    }

    /// Release the slot held by a dispatched task.
    fn complete(self: &Arc<Self>, id: TaskId) {
        {
            let mut queue = self.lock();
            queue.running = queue.running.saturating_sub(1);
        }
        self.forget(id);
    }

    /// Drop a finished task from the bookkeeping.
    fn forget(self: &Arc<Self>, id: TaskId) {
        let removed = self.lock().tasks.remove(&id).is_some();
        if removed {
            self.work_ended(1);
        }
        {
            let queue = self.lock();
            self.outstanding.send_replace(queue.tasks.len());
        }
        self.pump();
    }

    /// Balance `work_started` for `count` tasks leaving the executor.
    fn work_ended(&self, count: usize) {
        if let Some(activity) = &self.activity {
            for _ in 0..count {
                activity.work_ended();
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.emit(event).await;
        }
    }
}

/// Builder for an [`Executor`] with optional observers.
pub struct ExecutorBuilder {
    config: ExecutorConfig,
    events: Option<Arc<EventBus>>,
    activity: Option<Arc<dyn ActivityObserver>>,
}

impl ExecutorBuilder {
    /// Start from a configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            events: None,
            activity: None,
        }
    }

    /// Emit lifecycle events to `bus`.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Report submissions and completions to `observer`.
    pub fn activity(mut self, observer: Arc<dyn ActivityObserver>) -> Self {
        self.activity = Some(observer);
        self
    }

    /// Build the executor.
    pub fn build(self) -> Executor {
        let limit = self.config.max_concurrency.map(|max| {
            if max == 0 {
                warn!(executor = %self.config.name, "max_concurrency of 0 raised to 1");
            }
            max.max(1)
        });
        let (outstanding, _) = watch::channel(0);
        let queue = Queue {
            suspended: self.config.suspended,
            ..Queue::default()
        };

        Executor {
            shared: Arc::new(Shared {
                config: self.config,
                limit,
                queue: Mutex::new(queue),
                outstanding,
                next_seq: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                events: self.events,
                activity: self.activity,
            }),
        }
    }
}

/// Runs tasks in dependency order with a concurrency limit.
///
/// Submitting requires a Tokio runtime. Dropping the executor stops it:
/// tasks still waiting on dependencies are abandoned.
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    /// Create an executor from a configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        ExecutorBuilder::new(config).build()
    }

    /// Create a builder.
    pub fn builder(config: ExecutorConfig) -> ExecutorBuilder {
        ExecutorBuilder::new(config)
    }

    /// Executor that reports every task to a network activity observer.
    pub fn network(config: ExecutorConfig, observer: Arc<dyn ActivityObserver>) -> Self {
        ExecutorBuilder::new(config).activity(observer).build()
    }

    /// Name from the configuration.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The configuration this executor was built with.
    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// Effective concurrency limit, `None` when unbounded.
    pub fn max_concurrency(&self) -> Option<usize> {
        self.shared.limit
    }

    /// Accept a task. It runs once every dependency has finished.
    ///
    /// A task that was already submitted (here or elsewhere) is ignored.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn submit(&self, task: Arc<dyn Node>) {
        self.shared.submit(task);
    }

    /// Accept several tasks, preserving their order for tie breaking.
    pub fn submit_all(&self, tasks: impl IntoIterator<Item = Arc<dyn Node>>) {
        for task in tasks {
            self.shared.submit(task);
        }
    }

    /// Stop dispatching new tasks. Running tasks are unaffected.
    pub fn suspend(&self) {
        self.shared.lock().suspended = true;
        debug!(executor = %self.name(), "executor suspended");
    }

    /// Resume dispatching.
    pub fn resume(&self) {
        self.shared.lock().suspended = false;
        debug!(executor = %self.name(), "executor resumed");
        self.shared.pump();
    }

    /// Whether the executor is suspended.
    pub fn is_suspended(&self) -> bool {
        self.shared.lock().suspended
    }

    /// Cancel every task that has not finished yet.
    ///
    /// Tasks that have not started finish right away without running,
    /// whether or not their dependencies have finished; running tasks observe
    /// their cancellation flag.
    pub fn cancel_all(&self) {
        let tasks: Vec<Arc<dyn Node>> = self.shared.lock().tasks.values().cloned().collect();
        info!(executor = %self.name(), count = tasks.len(), "cancelling all tasks");
        for task in tasks {
            task.cancel();
        }
    }

    /// Tasks submitted and not yet finished.
    pub fn tasks(&self) -> Vec<Arc<dyn Node>> {
        self.shared.lock().tasks.values().cloned().collect()
    }

    /// Number of tasks submitted and not yet finished.
    pub fn task_count(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Number of tasks dispatched and not yet finished.
    pub fn running_count(&self) -> usize {
        self.shared.lock().running
    }

    /// Wait until every submitted task has finished.
    ///
    /// Never resolves while a suspended executor holds work.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.outstanding.subscribe();
        let _ = rx.wait_for(|outstanding| *outstanding == 0).await;
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();

        let abandoned = {
            let mut queue = self.shared.lock();
            queue.ready.clear();
            queue.tasks.drain().count()
        };
        if abandoned > 0 {
            debug!(executor = %self.name(), abandoned, "executor dropped with pending work");
        }
        self.shared.work_ended(abandoned);
    }
}
