//! DependencyResolver port - タスクの実行環境を組み立てる

use async_trait::async_trait;

use crate::domain::{ResolveError, Task};

/// Resolves a task's dependency graph into a structured environment document
/// (maps, sequences, scalars) that deduplication expressions run against.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn resolve(&self, task: &Task) -> Result<serde_json::Value, ResolveError>;
}
