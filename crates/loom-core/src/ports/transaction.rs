//! Transaction scope - 1 回のクレームを囲むトランザクション
//!
//! # 設計原則
//! - クレーム処理自身は commit / rollback しない（呼び出し側の責務）
//! - finalize / start の書き込みは同じトランザクション内で行う
//! - rollback（または drop）で行ロックを解放し、タスクは Pending のまま残る

use std::sync::Arc;

use async_trait::async_trait;

use super::{ExecutionHistory, PendingTaskSource, TaskFinalizer, TaskStarter};
use crate::domain::StoreError;

/// Store handles bound to one open transaction.
#[derive(Clone)]
pub struct ClaimPorts {
    pub tasks: Arc<dyn PendingTaskSource>,
    pub history: Arc<dyn ExecutionHistory>,
    pub finalizer: Arc<dyn TaskFinalizer>,
    pub starter: Arc<dyn TaskStarter>,
}

/// An open transaction. Consumed by `commit` or `rollback`.
#[async_trait]
pub trait Transaction: Send {
    fn ports(&self) -> ClaimPorts;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opens transactions against the task store.
#[async_trait]
pub trait TransactionScope: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}
