//! Execution history records.

use serde::{Deserialize, Serialize};

/// A `(workflow, step, fingerprint)` triple recorded once a task ran.
///
/// Append-only. The claim protocol only checks for existence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub workflow: String,
    pub step: String,
    pub fingerprint: String,
}

impl ExecutionRecord {
    pub fn new(
        workflow: impl Into<String>,
        step: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            step: step.into(),
            fingerprint: fingerprint.into(),
        }
    }

    pub fn matches(&self, workflow: &str, step: &str, fingerprint: &str) -> bool {
        self.workflow == workflow && self.step == step && self.fingerprint == fingerprint
    }
}
