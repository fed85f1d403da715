//! Core types for tasks, their lifecycle and result passing.

pub mod context;
pub mod operation;
pub mod task;
pub mod types;
