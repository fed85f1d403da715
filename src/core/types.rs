//! Identifier and lifecycle types shared by tasks and executors.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a task instance.
///
/// Every task receives a fresh id at construction, so two tasks are never
/// equal even if they perform identical work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new random TaskId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a TaskId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// Transitions are monotonic: `Ready -> Executing -> Finished`, with the
/// shortcut `Ready -> Finished` taken by tasks cancelled before they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting to be started.
    Ready,
    /// Work has been issued and not yet concluded.
    Executing,
    /// Terminal state.
    Finished,
}

impl TaskState {
    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        self < next
    }

    /// Check if this is the terminal state.
    pub fn is_finished(self) -> bool {
        self == TaskState::Finished
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Ready => "ready",
            TaskState::Executing => "executing",
            TaskState::Finished => "finished",
        };
        write!(f, "{}", s)
    }
}

/// Coarse scheduling hint for an executor.
///
/// Only influences how eagerly the runtime is given work; it never changes
/// the order in which ready tasks are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    Background,
    Utility,
    #[default]
    Default,
    UserInitiated,
    UserInteractive,
}

impl QualityOfService {
    /// Low priority classes hand control back to the runtime before each task.
    pub fn yields_before_start(self) -> bool {
        matches!(self, QualityOfService::Background | QualityOfService::Utility)
    }
}
