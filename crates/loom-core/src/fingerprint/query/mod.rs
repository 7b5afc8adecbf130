//! Embedded jq-style query language used by deduplication expressions.
//!
//! Supported: paths (`.a.b`, `."k"`, `.[0]`, `.["k"]`, `.[]`, `?`),
//! literals, array and object construction, `|`, `,`, `//`, `and`, `or`,
//! comparisons, arithmetic, and a handful of builtins (`empty`, `error`,
//! `not`, `length`, `keys`, `sort`, `tostring`, `tojson`, `select`, `map`,
//! `has`, `ascii_downcase`, `ascii_upcase`).

mod eval;
mod lexer;
mod parser;
pub(crate) mod value;

use serde_json::Value;
use thiserror::Error;

use self::eval::Flow;
use self::parser::Expr;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("syntax error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("unknown function {name}/{arity}")]
    UnknownFunction { name: String, arity: usize },

    #[error("{0}")]
    Type(String),

    #[error("error raised by expression: {}", display_raised(.0))]
    Raised(Value),
}

fn display_raised(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A parsed query, reusable across inputs.
#[derive(Debug, Clone)]
pub struct Query {
    expr: Expr,
}

impl Query {
    pub fn parse(src: &str) -> Result<Self, QueryError> {
        Ok(Self {
            expr: parser::parse(src)?,
        })
    }

    /// The first output, or `None` when the query yields nothing.
    ///
    /// Evaluation stops after the first output, so an error raised by a later
    /// output is never observed.
    pub fn first(&self, input: &Value) -> Result<Option<Value>, QueryError> {
        let mut first = None;
        eval::eval(&self.expr, input, &mut |v| {
            first = Some(v);
            Ok(Flow::Stop)
        })?;
        Ok(first)
    }

    /// All outputs, in order.
    pub fn run(&self, input: &Value) -> Result<Vec<Value>, QueryError> {
        let mut outputs = Vec::new();
        eval::eval(&self.expr, input, &mut |v| {
            outputs.push(v);
            Ok(Flow::Continue)
        })?;
        Ok(outputs)
    }
}
