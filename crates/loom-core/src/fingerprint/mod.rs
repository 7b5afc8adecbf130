//! Fingerprint evaluator.
//!
//! Turns a task plus its resolved environment into a deterministic
//! fingerprint and checks it against the execution history.

pub mod canonical;
pub mod dedup;
pub mod engine;
pub mod query;

pub use self::canonical::to_canonical_string;
pub use self::dedup::{DeduplicationError, Duplication, Fingerprinter};
pub use self::engine::{ExpressionEngine, JqEngine};
pub use self::query::{Query, QueryError};
