//! Deduplication - 実行済みタスクの判定
//!
//! # 手順
//! 1. タスク名を `<workflow>:<step>` に分解する
//! 2. 依存関係から実行環境ドキュメントを組み立てる
//! 3. step の重複判定式を環境に対して評価し、最初の出力を正規化 JSON にする
//! 4. 実行履歴に `(workflow, step, fingerprint)` があるかを確認する
//!
//! 指紋が得られない（式が空、または出力なし）場合は履歴を見ずに「重複なし」とします。

use std::sync::Arc;

use thiserror::Error;

use super::canonical::to_canonical_string;
use super::engine::ExpressionEngine;
use super::query::QueryError;
use crate::domain::{ClaimErrorKind, ResolveError, StoreError, Task, TaskNameError};
use crate::ports::{DependencyResolver, ExecutionHistory};

#[derive(Debug, Error)]
pub enum DeduplicationError {
    #[error(transparent)]
    InvalidTaskName(#[from] TaskNameError),

    #[error("resolving task dependencies")]
    DependencyResolutionFailed(#[source] ResolveError),

    #[error("evaluating deduplication expression")]
    FingerprintEvaluationFailed(#[source] QueryError),

    #[error("querying execution history")]
    HistoryLookupFailed(#[source] StoreError),
}

impl DeduplicationError {
    pub fn kind(&self) -> ClaimErrorKind {
        match self {
            DeduplicationError::InvalidTaskName(_) => ClaimErrorKind::InvalidTaskName,
            DeduplicationError::DependencyResolutionFailed(_) => {
                ClaimErrorKind::DependencyResolutionFailed
            }
            DeduplicationError::FingerprintEvaluationFailed(_) => {
                ClaimErrorKind::FingerprintEvaluationFailed
            }
            DeduplicationError::HistoryLookupFailed(_) => ClaimErrorKind::TaskHistoryLookupFailed,
        }
    }
}

/// Result of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Duplication {
    /// No fingerprint could be derived; deduplication does not apply.
    NotApplicable,
    Unique { fingerprint: String },
    AlreadyRan { fingerprint: String },
}

impl Duplication {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Duplication::AlreadyRan { .. })
    }

    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            Duplication::NotApplicable => None,
            Duplication::Unique { fingerprint } | Duplication::AlreadyRan { fingerprint } => {
                Some(fingerprint)
            }
        }
    }
}

/// Derives task fingerprints and checks them against the execution history.
#[derive(Clone)]
pub struct Fingerprinter {
    resolver: Arc<dyn DependencyResolver>,
    engine: Arc<dyn ExpressionEngine>,
}

impl Fingerprinter {
    pub fn new(resolver: Arc<dyn DependencyResolver>, engine: Arc<dyn ExpressionEngine>) -> Self {
        Self { resolver, engine }
    }

    /// Canonical JSON of the first output of the step's deduplication
    /// expression, or `None` when there is nothing to fingerprint.
    ///
    /// The environment is resolved even when the expression is empty, so a
    /// broken dependency graph surfaces on every claim.
    pub async fn fingerprint(&self, task: &Task) -> Result<Option<String>, DeduplicationError> {
        let env = self
            .resolver
            .resolve(task)
            .await
            .map_err(DeduplicationError::DependencyResolutionFailed)?;

        if !task.step.deduplicates() {
            return Ok(None);
        }

        let first = self
            .engine
            .first_output(&task.step.deduplication, &env)
            .map_err(DeduplicationError::FingerprintEvaluationFailed)?;

        Ok(first.map(|v| to_canonical_string(&v)))
    }

    pub async fn is_duplicate(
        &self,
        task: &Task,
        history: &dyn ExecutionHistory,
    ) -> Result<Duplication, DeduplicationError> {
        let name = task.parsed_name()?;

        let Some(fingerprint) = self.fingerprint(task).await? else {
            return Ok(Duplication::NotApplicable);
        };

        let seen = history
            .contains(name.workflow(), name.step(), &fingerprint)
            .await
            .map_err(DeduplicationError::HistoryLookupFailed)?;

        Ok(if seen {
            Duplication::AlreadyRan { fingerprint }
        } else {
            Duplication::Unique { fingerprint }
        })
    }
}
