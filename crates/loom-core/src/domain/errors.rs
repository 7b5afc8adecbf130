//! Errors - エラー型と分類
//!
//! クレーム処理のエラーは「業務上の結果」（期限切れ・重複）と
//! 「インフラ障害」（ストア・評価器の失敗）を区別できるようにしています。
//! 呼び出し側は [`ErrorClass`] を見てログレベルとリトライ方針を決めます。

use std::fmt;

use thiserror::Error;

use super::{TaskId, TaskStatus};
use crate::fingerprint::DeduplicationError;

/// Errors reported by task store adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("{0} not found")]
    NotFound(TaskId),

    #[error("{0} is not locked by this transaction")]
    NotLocked(TaskId),

    #[error("transaction already closed")]
    Closed,

    #[error("store state poisoned by a panicked writer")]
    Poisoned,
}

/// Errors reported while resolving a task's runtime environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("{task_id} depends on missing {missing}")]
    MissingDependency { task_id: TaskId, missing: TaskId },

    #[error("dependency cycle through {0:?}")]
    Cycle(Vec<TaskId>),

    #[error("dependency {0} has a malformed name")]
    MalformedDependency(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which step of the claim sequence a `ClaimFailed` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStage {
    Fetch,
    FinalizeOutdated,
    FinalizeDuplicated,
}

impl fmt::Display for ClaimStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClaimStage::Fetch => "fetching next pending task",
            ClaimStage::FinalizeOutdated => "cancelling outdated task",
            ClaimStage::FinalizeDuplicated => "marking task duplicated",
        };
        f.write_str(s)
    }
}

/// Error returned by a claim attempt.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("no pending task")]
    NoPendingTask,

    #[error("{task_id} was cancelled: upper plan is outdated")]
    TaskOutdated { task_id: TaskId },

    #[error("{task_id} was marked duplicated: task already ran")]
    TaskDuplicated { task_id: TaskId, fingerprint: String },

    #[error("checking execution history of {task_id}")]
    TaskHistoryLookupFailed {
        task_id: TaskId,
        #[source]
        source: DeduplicationError,
    },

    #[error("starting {task_id}")]
    StartFailed {
        task_id: TaskId,
        #[source]
        source: StoreError,
    },

    #[error("claim failed while {stage}")]
    ClaimFailed {
        stage: ClaimStage,
        task_id: Option<TaskId>,
        #[source]
        source: StoreError,
    },
}

/// Flat classification of every claim failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimErrorKind {
    NoPendingTask,
    TaskOutdated,
    TaskDuplicated,
    TaskHistoryLookupFailed,
    DependencyResolutionFailed,
    FingerprintEvaluationFailed,
    InvalidTaskName,
    StartFailed,
    ClaimFailed,
}

/// How a caller should treat a claim error.
///
/// - Idle: nothing to do; back off and poll again.
/// - Outcome: expected business result; log and move on.
/// - Retryable: infrastructure hiccup; roll back and retry.
/// - Fatal: store may be inconsistent; log loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Idle,
    Outcome,
    Retryable,
    Fatal,
}

impl ClaimErrorKind {
    pub fn class(self) -> ErrorClass {
        use ClaimErrorKind::*;
        match self {
            NoPendingTask => ErrorClass::Idle,
            TaskOutdated | TaskDuplicated => ErrorClass::Outcome,
            TaskHistoryLookupFailed
            | DependencyResolutionFailed
            | FingerprintEvaluationFailed
            | InvalidTaskName
            | StartFailed => ErrorClass::Retryable,
            ClaimFailed => ErrorClass::Fatal,
        }
    }
}

impl ClaimError {
    /// The taxonomy kind. For deduplication failures this reports the
    /// underlying cause rather than the wrapper.
    pub fn kind(&self) -> ClaimErrorKind {
        match self {
            ClaimError::NoPendingTask => ClaimErrorKind::NoPendingTask,
            ClaimError::TaskOutdated { .. } => ClaimErrorKind::TaskOutdated,
            ClaimError::TaskDuplicated { .. } => ClaimErrorKind::TaskDuplicated,
            ClaimError::TaskHistoryLookupFailed { source, .. } => source.kind(),
            ClaimError::StartFailed { .. } => ClaimErrorKind::StartFailed,
            ClaimError::ClaimFailed { .. } => ClaimErrorKind::ClaimFailed,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.kind().class()
    }

    /// True for the expected business outcomes (outdated / duplicated).
    pub fn is_outcome(&self) -> bool {
        self.class() == ErrorClass::Outcome
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            ClaimError::NoPendingTask => None,
            ClaimError::TaskOutdated { task_id }
            | ClaimError::TaskDuplicated { task_id, .. }
            | ClaimError::TaskHistoryLookupFailed { task_id, .. }
            | ClaimError::StartFailed { task_id, .. } => Some(*task_id),
            ClaimError::ClaimFailed { task_id, .. } => *task_id,
        }
    }
}
