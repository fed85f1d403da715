//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for executors.

mod error;
mod types;

pub use error::ConfigError;
pub use types::{DEFAULT_EXECUTOR_NAME, ExecutorConfig};
