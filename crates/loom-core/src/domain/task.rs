//! Task model: the unit of schedulable work a worker claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::{TaskId, TaskStatus, WorkerId};

/// Separator between the workflow and step segments of a task name.
pub const TASK_NAME_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskNameError {
    #[error("task name '{0}' has no '{TASK_NAME_SEPARATOR}' separator")]
    MissingSeparator(String),

    #[error("task name '{0}' has more than one '{TASK_NAME_SEPARATOR}' separator")]
    AmbiguousSeparator(String),

    #[error("task name '{0}' has an empty workflow or step segment")]
    EmptySegment(String),

    #[error("task name '{0}' has leading or trailing whitespace in a segment")]
    UnpaddedSegment(String),
}

/// A task name split into its workflow and step segments.
///
/// Encoding is `<workflow>:<step>`. The separator is reserved: neither
/// segment may contain it, so every valid name splits exactly one way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskName {
    workflow: String,
    step: String,
}

impl TaskName {
    pub fn new(workflow: impl Into<String>, step: impl Into<String>) -> Result<Self, TaskNameError> {
        let workflow = workflow.into();
        let step = step.into();
        let joined = format!("{workflow}{TASK_NAME_SEPARATOR}{step}");
        Self::validate_segment(&workflow, &joined)?;
        Self::validate_segment(&step, &joined)?;
        Ok(Self { workflow, step })
    }

    fn validate_segment(segment: &str, whole: &str) -> Result<(), TaskNameError> {
        if segment.is_empty() {
            return Err(TaskNameError::EmptySegment(whole.to_string()));
        }
        if segment.contains(TASK_NAME_SEPARATOR) {
            return Err(TaskNameError::AmbiguousSeparator(whole.to_string()));
        }
        if segment.trim() != segment {
            return Err(TaskNameError::UnpaddedSegment(whole.to_string()));
        }
        Ok(())
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn step(&self) -> &str {
        &self.step
    }
}

impl FromStr for TaskName {
    type Err = TaskNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((workflow, step)) = s.split_once(TASK_NAME_SEPARATOR) else {
            return Err(TaskNameError::MissingSeparator(s.to_string()));
        };
        if step.contains(TASK_NAME_SEPARATOR) {
            return Err(TaskNameError::AmbiguousSeparator(s.to_string()));
        }
        Self::new(workflow, step)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.workflow, TASK_NAME_SEPARATOR, self.step)
    }
}

/// Scheduling window of a task.
///
/// `upper: None` means no upper bound is configured; the task never expires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<DateTime<Utc>>,
}

impl Plan {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn until(upper: DateTime<Utc>) -> Self {
        Self {
            lower: None,
            upper: Some(upper),
        }
    }

    /// True when the upper bound is set and strictly before `now`.
    pub fn is_outdated(&self, now: DateTime<Utc>) -> bool {
        matches!(self.upper, Some(upper) if upper < now)
    }
}

/// Step definition attached to a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Deduplication expression evaluated over the resolved environment.
    /// Empty disables deduplication.
    #[serde(default)]
    pub deduplication: String,
}

impl Step {
    pub fn with_deduplication(expression: impl Into<String>) -> Self {
        Self {
            deduplication: expression.into(),
        }
    }

    pub fn deduplicates(&self) -> bool {
        !self.deduplication.is_empty()
    }
}

/// A task as read from the task store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Composite `<workflow>:<step>` name. Kept raw because a stored name
    /// is not guaranteed to be well formed; see [`Task::parsed_name`].
    pub name: String,

    #[serde(default)]
    pub plan: Plan,

    #[serde(default)]
    pub step: Step,

    pub status: TaskStatus,

    #[serde(default)]
    pub input: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_uuid: Option<WorkerId>,
}

impl Task {
    /// A fresh pending task with no plan bound and deduplication disabled.
    pub fn pending(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            plan: Plan::unbounded(),
            step: Step::default(),
            status: TaskStatus::Pending,
            input: serde_json::Value::Null,
            depends_on: Vec::new(),
            output: None,
            worker_uuid: None,
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.step = step;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_dependency(mut self, depends_on: TaskId) -> Self {
        self.depends_on.push(depends_on);
        self
    }

    pub fn parsed_name(&self) -> Result<TaskName, TaskNameError> {
        self.name.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;

    #[test]
    fn task_name_splits_into_workflow_and_step() {
        let name: TaskName = "billing:charge".parse().unwrap();
        assert_eq!(name.workflow(), "billing");
        assert_eq!(name.step(), "charge");
        assert_eq!(name.to_string(), "billing:charge");
    }

    #[rstest]
    #[case::no_separator("billing")]
    #[case::two_separators("billing:charge:v2")]
    #[case::empty_workflow(":charge")]
    #[case::empty_step("billing:")]
    #[case::padded(" billing:charge")]
    #[case::empty("")]
    fn malformed_task_names_are_rejected(#[case] raw: &str) {
        assert!(raw.parse::<TaskName>().is_err());
    }

    #[test]
    fn constructor_rejects_separator_inside_segment() {
        let err = TaskName::new("a:b", "c").unwrap_err();
        assert!(matches!(err, TaskNameError::AmbiguousSeparator(_)));
    }

    #[test]
    fn plan_without_upper_never_expires() {
        let plan = Plan::unbounded();
        assert!(!plan.is_outdated(Utc::now()));
    }

    #[test]
    fn plan_upper_in_past_is_outdated() {
        let now = Utc::now();
        assert!(Plan::until(now - Duration::hours(1)).is_outdated(now));
        assert!(!Plan::until(now + Duration::hours(1)).is_outdated(now));
    }

    #[test]
    fn plan_upper_equal_to_now_is_not_outdated() {
        let now = Utc::now();
        assert!(!Plan::until(now).is_outdated(now));
    }

    #[test]
    fn task_roundtrips_through_json() {
        let task = Task::pending(TaskId::new(3), "wf:step")
            .with_step(Step::with_deduplication(".input.key"))
            .with_input(serde_json::json!({"key": "abc"}));
        let s = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&s).unwrap();
        assert_eq!(back, task);
    }
}
