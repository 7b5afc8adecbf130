//! Structured output written when a task is finalized.
//!
//! The shape varies by reason, so this is an open JSON document rather than
//! a fixed struct.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const OUTDATED_REASON: &str = "task upper plan is outdated";
pub const ALREADY_RAN_REASON: &str = "task already ran";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskOutput(Map<String, Value>);

impl TaskOutput {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// `{"error": <message>}`
    pub fn error(message: impl Into<String>) -> Self {
        Self::new().with("error", Value::String(message.into()))
    }

    /// Output recorded when the plan's upper bound has passed.
    pub fn outdated() -> Self {
        Self::error(OUTDATED_REASON)
    }

    /// Output recorded when an equivalent execution already happened.
    pub fn already_ran() -> Self {
        Self::error(ALREADY_RAN_REASON)
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for TaskOutput {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
