//! Task execution engine.
//!
//! This module provides the executor that runs tasks in dependency order,
//! and the batch construct that nests a whole task graph behind one task.

mod batch;
mod executor;

pub use batch::{BatchTask, BlockTask, DEFAULT_BATCH_NAME};
pub use executor::{Executor, ExecutorBuilder};
