//! Task trait and error types.
//!
//! The `Task` trait is the unit of work the executor schedules. A type that
//! implements it supplies the work procedure; lifecycle state, the result
//! slot and cancellation are owned by the [`Operation`](super::operation::Operation)
//! wrapping it, so an "abstract" task with no behavior cannot be built.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::context::TaskContext;
use super::operation::Node;

/// Failures recorded in a task's value.
///
/// Tasks never propagate these across task boundaries; a task stores its
/// failure as the `Err` side of its value and downstream tasks decide what to
/// do with it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Network or HTTP failure reported by a transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload could not be decoded into the requested type.
    #[error("decode error: {0}")]
    Decode(String),

    /// A filesystem operation such as moving a download into place failed.
    #[error("filesystem error at '{}': {message}", path.display())]
    Filesystem {
        path: PathBuf,
        code: Option<i32>,
        message: String,
    },

    /// The content to be written could not be read.
    #[error("source unreadable '{}': {message}", path.display())]
    SourceUnreadable { path: PathBuf, message: String },

    /// Writing to the destination failed with an OS error code.
    #[error("write failed with code {0}")]
    WriteFailed(i32),

    /// A required upstream task was not finished or produced no usable value.
    #[error("missing predecessor: {0}")]
    MissingPredecessor(String),

    /// The task was cancelled while its work was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    /// Build a filesystem error from an IO error.
    pub fn filesystem(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        TaskError::Filesystem {
            path: path.into(),
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }

    /// Build a write failure from an IO error, using -1 when the OS gave no code.
    pub fn write_failed(err: &std::io::Error) -> Self {
        TaskError::WriteFailed(err.raw_os_error().unwrap_or(-1))
    }

    /// Check if this error is the cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// How a task signals that its work concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// The task is finished as soon as `execute` returns.
    #[default]
    Inline,
    /// `execute` only dispatches the work; the task is finished later by a
    /// call to [`TaskContext::finish`], possibly from another thread.
    Deferred,
}

/// The core trait for defining schedulable work.
///
/// # Example
///
/// ```ignore
/// use tessera::{Operation, Task, TaskContext};
/// use async_trait::async_trait;
///
/// struct Double {
///     input: u64,
/// }
///
/// #[async_trait]
/// impl Task for Double {
///     type Output = u64;
///
///     fn name(&self) -> &str {
///         "double"
///     }
///
///     async fn execute(&self, ctx: &TaskContext<u64>) {
///         if ctx.is_cancelled() {
///             return;
///         }
///         ctx.set_value(self.input * 2);
///     }
/// }
///
/// let op = Operation::new(Double { input: 21 });
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Result payload stored in the task's value slot.
    type Output: Clone + Send + Sync + 'static;

    /// Human readable name used in logs and events.
    fn name(&self) -> &str;

    /// Perform (or dispatch) the work.
    ///
    /// Called at most once, only when the task was not cancelled beforehand.
    /// Long running work should poll [`TaskContext::is_cancelled`] at natural
    /// checkpoints.
    async fn execute(&self, ctx: &TaskContext<Self::Output>);

    /// Whether completion is inline or signaled later.
    fn completion(&self) -> Completion {
        Completion::Inline
    }

    /// Tasks this work reads results from.
    ///
    /// They are declared as dependencies when the task is wrapped in an
    /// [`Operation`](super::operation::Operation).
    fn predecessors(&self) -> Vec<Arc<dyn Node>> {
        Vec::new()
    }

    /// Hook invoked when the wrapping operation is cancelled, after the
    /// task's own cancellation flag is raised.
    fn on_cancel(&self) {}
}
