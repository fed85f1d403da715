//! Testing utilities for users of the tessera library.
//!
//! This module provides helpers for testing task graphs:
//!
//! - [`MockTransport`]: canned responses keyed by URL, with optional latency
//! - [`MockDownloader`]: writes canned bodies to temporary files
//! - [`Tracker`] and [`TrackedTask`]: tasks that record start order and the
//!   peak number running at once

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::core::context::TaskContext;
use crate::core::task::{Completion, Task, TaskError};
use crate::tasks::{Downloader, Request, Transport};

/// Canned outcomes keyed by URL, shared by the two mocks.
#[derive(Default)]
struct Responses {
    by_url: HashMap<String, Result<Vec<u8>, TaskError>>,
    latency: Duration,
    requests: Mutex<Vec<Request>>,
}

impl Responses {
    async fn answer(&self, request: &Request) -> Result<Vec<u8>, TaskError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.by_url.get(&request.url).cloned().unwrap_or_else(|| {
            Err(TaskError::Transport(format!("no response for {}", request.url)))
        })
    }

    fn requests(&self) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A transport that answers from a table.
///
/// Unknown URLs fail with [`TaskError::Transport`].
///
/// # Example
///
/// ```
/// use tessera::testing::MockTransport;
///
/// let transport = MockTransport::new()
///     .respond("https://api.test/1", br#"{"id":1}"#.to_vec());
/// assert!(transport.requests().is_empty());
/// ```
#[derive(Default)]
pub struct MockTransport {
    responses: Responses,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `body`.
    pub fn respond(mut self, url: impl Into<String>, body: Vec<u8>) -> Self {
        self.responses.by_url.insert(url.into(), Ok(body));
        self
    }

    /// Answer `url` with `error`.
    pub fn fail(mut self, url: impl Into<String>, error: TaskError) -> Self {
        self.responses.by_url.insert(url.into(), Err(error));
        self
    }

    /// Delay every answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.responses.latency = latency;
        self
    }

    /// Requests received so far, including ones later aborted.
    pub fn requests(&self) -> Vec<Request> {
        self.responses.requests()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<Vec<u8>, TaskError> {
        self.responses.answer(request).await
    }
}

/// A downloader that writes canned bodies into a directory.
pub struct MockDownloader {
    dir: PathBuf,
    responses: Responses,
}

impl MockDownloader {
    /// Downloader placing its temporary files in `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            responses: Responses::default(),
        }
    }

    /// Answer `url` with `body`.
    pub fn respond(mut self, url: impl Into<String>, body: Vec<u8>) -> Self {
        self.responses.by_url.insert(url.into(), Ok(body));
        self
    }

    /// Answer `url` with `error`.
    pub fn fail(mut self, url: impl Into<String>, error: TaskError) -> Self {
        self.responses.by_url.insert(url.into(), Err(error));
        self
    }

    /// Delay every answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.responses.latency = latency;
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.responses.requests()
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, request: &Request) -> Result<PathBuf, TaskError> {
        let body = self.responses.answer(request).await?;
        let path = self.dir.join(format!(".mock-{}.download", Uuid::new_v4()));
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| TaskError::filesystem(&path, &e))?;
        Ok(path)
    }
}

/// Shared recorder for a group of [`TrackedTask`]s.
#[derive(Default)]
pub struct Tracker {
    running: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest number of tracked tasks that were running at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of tracked tasks running right now.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Names in the order the tasks began their work.
    pub fn started(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names in the order the tasks completed their work.
    pub fn finished(&self) -> Vec<String> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn enter(&self, name: &str) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.to_string());
    }

    fn exit(&self, name: &str, completed: bool) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        if completed {
            self.finished
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(name.to_string());
        }
    }
}

/// A task that holds a slot for `duration` and records itself in a [`Tracker`].
///
/// Its value is its name. Cancellation cuts the wait short and leaves no
/// value.
pub struct TrackedTask {
    name: String,
    tracker: Arc<Tracker>,
    duration: Duration,
    completion: Completion,
}

impl TrackedTask {
    pub fn new(name: impl Into<String>, tracker: &Arc<Tracker>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            tracker: Arc::clone(tracker),
            duration,
            completion: Completion::Inline,
        }
    }

    /// Builder: do the work on a spawned future and finish from there.
    pub fn deferred(mut self) -> Self {
        self.completion = Completion::Deferred;
        self
    }
}

async fn tracked_work(
    name: String,
    tracker: Arc<Tracker>,
    duration: Duration,
    ctx: TaskContext<String>,
) {
    tracker.enter(&name);
    let completed = tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = ctx.cancelled() => false,
    };
    tracker.exit(&name, completed);
    if completed {
        ctx.set_value(name);
    }
}

#[async_trait]
impl Task for TrackedTask {
    type Output = String;

    fn name(&self) -> &str {
        &self.name
    }

    fn completion(&self) -> Completion {
        self.completion
    }

    async fn execute(&self, ctx: &TaskContext<String>) {
        let work = tracked_work(
            self.name.clone(),
            Arc::clone(&self.tracker),
            self.duration,
            ctx.clone(),
        );
        match self.completion {
            Completion::Inline => work.await,
            Completion::Deferred => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    work.await;
                    ctx.finish();
                });
            }
        }
    }
}
