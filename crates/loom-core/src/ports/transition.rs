//! Task Transition Executor ports.
//!
//! The claimer consumes these; it does not own them. Both writes are issued
//! inside the caller's transaction.

use async_trait::async_trait;

use crate::domain::{StoreError, TaskId, TaskOutput, TaskStatus, WorkerId};

/// Writes a terminal status with a structured output.
#[async_trait]
pub trait TaskFinalizer: Send + Sync {
    async fn finalize(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        output: TaskOutput,
    ) -> Result<(), StoreError>;
}

/// Moves a task from `Pending` to `Running`.
///
/// Must fail (not no-op) when the task is no longer `Pending`, so that two
/// concurrent claims cannot both succeed.
#[async_trait]
pub trait TaskStarter: Send + Sync {
    async fn start(&self, task_id: TaskId, worker: WorkerId) -> Result<(), StoreError>;
}
