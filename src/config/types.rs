//! Configuration type definitions.
//!
//! `ExecutorConfig` describes a single executor: its name, concurrency
//! limit, quality-of-service hint and whether it starts suspended. It can be
//! built in code or loaded from YAML.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::ConfigError;
use crate::core::types::QualityOfService;

/// Default executor name used in logs and events.
pub const DEFAULT_EXECUTOR_NAME: &str = "tessera.executor";

/// Executor configuration.
///
/// ```yaml
/// name: network
/// max_concurrency: 4
/// quality_of_service: background
/// suspended: false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Label used in tracing spans and events.
    pub name: String,
    /// Maximum tasks between dispatch and finish. `None` means unbounded.
    pub max_concurrency: Option<usize>,
    /// Scheduling hint; never affects ordering.
    pub quality_of_service: QualityOfService,
    /// Accept submissions without starting anything until resumed.
    pub suspended: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_EXECUTOR_NAME.to_string(),
            max_concurrency: None,
            quality_of_service: QualityOfService::default(),
            suspended: false,
        }
    }
}

impl ExecutorConfig {
    /// Default configuration with a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: limit concurrent tasks.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Builder: set the quality-of-service hint.
    pub fn with_quality_of_service(mut self, qos: QualityOfService) -> Self {
        self.quality_of_service = qos;
        self
    }

    /// Builder: start suspended.
    pub fn suspended(mut self) -> Self {
        self.suspended = true;
        self
    }

    /// Parse a configuration from a YAML string and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ExecutorConfig = serde_yaml::from_str(yaml).map_err(ConfigError::YamlError)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ExecutorConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values an executor cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("name".to_string()));
        }
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
