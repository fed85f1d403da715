//! tessera - dependency-ordered task execution.
//!
//! Tasks are wrapped in [`Operation`]s, wired together with dependencies and
//! submitted to an [`Executor`], which starts each one once everything it
//! depends on has finished. A [`BatchTask`] nests a whole graph on a private
//! executor behind a single task.

pub mod activity;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
#[cfg(feature = "http")]
pub mod http;
pub mod tasks;
pub mod testing;

pub use activity::{ActivityIndicator, ActivityObserver};
pub use config::{ConfigError, ExecutorConfig};
pub use core::context::{TaskContext, Upstream};
pub use core::operation::{GraphError, Node, Operation, wait_finished};
pub use core::task::{Completion, Task, TaskError};
pub use core::types::{QualityOfService, TaskId, TaskState};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{BatchTask, BlockTask, Executor, ExecutorBuilder};
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use tasks::{DecodeTask, DownloadTask, FetchTask, Request, WriteContent, WriteTask};
