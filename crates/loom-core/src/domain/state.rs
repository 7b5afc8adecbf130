//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status as persisted by the task store.
///
/// State transitions owned by the claim protocol:
/// - Pending -> Running (claimed and started by a worker)
/// - Pending -> Cancelled (upper plan bound already passed)
/// - Pending -> Duplicated (same workflow/step/fingerprint already ran)
///
/// `Succeeded` / `Failed` are written by the step-execution runtime after a
/// task has run; the claim protocol only reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Pending,

    /// Owned by a worker and executing.
    Running,

    /// Cancelled before it ever ran.
    Cancelled,

    /// Skipped because an equivalent execution already happened.
    Duplicated,

    /// Finished successfully.
    Succeeded,

    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled
                | TaskStatus::Duplicated
                | TaskStatus::Succeeded
                | TaskStatus::Failed
        )
    }

    /// Is this task eligible to be claimed?
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    /// Whether the store may move a task from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Running | Cancelled | Duplicated) => true,
            (Running, Succeeded | Failed | Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Duplicated => "DUPLICATED",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
