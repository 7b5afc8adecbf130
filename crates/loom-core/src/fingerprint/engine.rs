//! Expression engines evaluate a deduplication expression over an environment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::query::{Query, QueryError};

/// Upper bound on cached parsed expressions before the cache is reset.
const MAX_CACHED_QUERIES: usize = 256;

/// Evaluates an extraction expression and returns its first output.
///
/// Kept behind a trait so the expression language can be swapped without
/// touching the claim protocol.
pub trait ExpressionEngine: Send + Sync {
    fn first_output(&self, expression: &str, input: &Value) -> Result<Option<Value>, QueryError>;
}

/// The embedded jq-style engine.
///
/// Parsed queries are cached by source text; steps reuse the same handful of
/// expressions across many tasks.
#[derive(Debug, Default)]
pub struct JqEngine {
    cache: Mutex<HashMap<String, Arc<Query>>>,
}

impl JqEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, expression: &str) -> Result<Arc<Query>, QueryError> {
        let Ok(mut cache) = self.cache.lock() else {
            return Query::parse(expression).map(Arc::new);
        };
        if let Some(query) = cache.get(expression) {
            return Ok(Arc::clone(query));
        }
        let query = Arc::new(Query::parse(expression)?);
        if cache.len() >= MAX_CACHED_QUERIES {
            cache.clear();
        }
        cache.insert(expression.to_string(), Arc::clone(&query));
        Ok(query)
    }
}

impl ExpressionEngine for JqEngine {
    fn first_output(&self, expression: &str, input: &Value) -> Result<Option<Value>, QueryError> {
        self.compile(expression)?.first(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repeated_expressions_hit_the_cache() {
        let engine = JqEngine::new();
        let input = json!({"k": 1});
        assert_eq!(engine.first_output(".k", &input).unwrap(), Some(json!(1)));
        assert_eq!(engine.first_output(".k", &input).unwrap(), Some(json!(1)));
        assert_eq!(engine.cache.lock().unwrap().len(), 1);
    }

    #[test]
    fn parse_errors_are_not_cached() {
        let engine = JqEngine::new();
        assert!(engine.first_output(".[", &Value::Null).is_err());
        assert!(engine.cache.lock().unwrap().is_empty());
    }
}
