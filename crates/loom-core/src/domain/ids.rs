//! Domain identifiers (strongly-typed IDs).
//!
//! Task ID はストア側で採番される整数、Worker ID は各ワーカープロセスが
//! 起動時に生成する UUID です。どちらも newtype で包んで混同を防ぎます。

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a Task, assigned by the task store.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Identity of the worker that owns a claimed task.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(Uuid);

impl WorkerId {
    /// Generate a fresh random worker identity (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_display_has_prefix() {
        assert_eq!(TaskId::new(42).to_string(), "task-42");
    }

    #[test]
    fn task_id_serializes_as_plain_number() {
        let s = serde_json::to_string(&TaskId::new(7)).unwrap();
        assert_eq!(s, "7");
        let back: TaskId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, TaskId::new(7));
    }

    #[test]
    fn generated_worker_ids_are_unique() {
        let a = WorkerId::generate();
        let b = WorkerId::generate();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("worker-"));
    }
}
