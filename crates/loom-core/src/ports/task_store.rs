//! TaskStore ports - タスクの正本（source of truth）への読み取り口
//!
//! # 設計原則
//! - `next_pending_task` は fetch と行ロックを同時に行う（SKIP LOCKED 相当）
//! - 空のキューは `Ok(None)`、I/O 障害は `Err` で区別する
//! - 実行履歴は append-only。ここでは存在確認のみ

use async_trait::async_trait;

use crate::domain::{StoreError, Task};

/// Reads the next claimable task.
///
/// Implementations must guarantee that two open transactions never receive
/// the same task.
#[async_trait]
pub trait PendingTaskSource: Send + Sync {
    async fn next_pending_task(&self) -> Result<Option<Task>, StoreError>;
}

/// Existence check over the execution history.
#[async_trait]
pub trait ExecutionHistory: Send + Sync {
    async fn contains(
        &self,
        workflow: &str,
        step: &str,
        fingerprint: &str,
    ) -> Result<bool, StoreError>;
}
