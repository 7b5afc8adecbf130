//! Streaming evaluator.
//!
//! Every expression is a generator: it pushes zero or more outputs into a
//! sink. The sink returns `Flow::Stop` to end evaluation early, which is how
//! `Query::first` avoids computing outputs nobody reads.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::QueryError;
use super::parser::{BinaryOp, Builtin, Expr, ObjectKey};
use super::value::{as_f64, compare, is_truthy, number, type_name};
use crate::fingerprint::canonical::to_canonical_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

pub(crate) type Sink<'a> = dyn FnMut(Value) -> Result<Flow, QueryError> + 'a;

pub(crate) fn eval(expr: &Expr, input: &Value, out: &mut Sink<'_>) -> Result<Flow, QueryError> {
    match expr {
        Expr::Identity => out(input.clone()),
        Expr::Literal(v) => out(v.clone()),
        Expr::Index { target, key } => eval(target, input, &mut |t| {
            eval(key, input, &mut |k| out(index(&t, &k)?))
        }),
        Expr::Iterate(target) => eval(target, input, &mut |t| iterate(t, out)),
        Expr::Try(inner) => {
            let mut downstream_failed = false;
            let result = eval(inner, input, &mut |v| {
                out(v).inspect_err(|_| downstream_failed = true)
            });
            match result {
                Err(err) if downstream_failed => Err(err),
                Err(_) => Ok(Flow::Continue),
                ok => ok,
            }
        }
        Expr::Array(inner) => {
            let mut items = Vec::new();
            if let Some(inner) = inner {
                eval(inner, input, &mut |v| {
                    items.push(v);
                    Ok(Flow::Continue)
                })?;
            }
            out(Value::Array(items))
        }
        Expr::Object(entries) => build_object(entries, input, Map::new(), out),
        Expr::Pipe(lhs, rhs) => eval(lhs, input, &mut |v| eval(rhs, &v, out)),
        Expr::Comma(lhs, rhs) => {
            if eval(lhs, input, out)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
            eval(rhs, input, out)
        }
        Expr::Alt(lhs, rhs) => {
            let mut truthy = Vec::new();
            // errors on the left-hand side mean "no value"
            let _ = eval(lhs, input, &mut |v| {
                if is_truthy(&v) {
                    truthy.push(v);
                }
                Ok(Flow::Continue)
            });
            if truthy.is_empty() {
                return eval(rhs, input, out);
            }
            for v in truthy {
                if out(v)? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            Ok(Flow::Continue)
        }
        Expr::And(lhs, rhs) => eval(lhs, input, &mut |l| {
            if !is_truthy(&l) {
                return out(Value::Bool(false));
            }
            eval(rhs, input, &mut |r| out(Value::Bool(is_truthy(&r))))
        }),
        Expr::Or(lhs, rhs) => eval(lhs, input, &mut |l| {
            if is_truthy(&l) {
                return out(Value::Bool(true));
            }
            eval(rhs, input, &mut |r| out(Value::Bool(is_truthy(&r))))
        }),
        Expr::Binary(op, lhs, rhs) => eval(rhs, input, &mut |r| {
            eval(lhs, input, &mut |l| out(binary(*op, l, &r)?))
        }),
        Expr::Neg(operand) => eval(operand, input, &mut |v| match &v {
            Value::Number(n) => out(number(-as_f64(n))?),
            other => Err(QueryError::Type(format!(
                "{} cannot be negated",
                type_name(other)
            ))),
        }),
        Expr::Call(builtin, args) => call(*builtin, args, input, out),
    }
}

fn index(target: &Value, key: &Value) -> Result<Value, QueryError> {
    match (target, key) {
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), Value::Number(n)) => {
            let len = items.len() as i64;
            let mut i = as_f64(n).floor() as i64;
            if i < 0 {
                i += len;
            }
            if i < 0 || i >= len {
                return Ok(Value::Null);
            }
            Ok(items[i as usize].clone())
        }
        (Value::Null, Value::String(_) | Value::Number(_)) => Ok(Value::Null),
        (t, Value::String(k)) => Err(QueryError::Type(format!(
            "cannot index {} with \"{k}\"",
            type_name(t)
        ))),
        (t, k) => Err(QueryError::Type(format!(
            "cannot index {} with {}",
            type_name(t),
            type_name(k)
        ))),
    }
}

fn iterate(target: Value, out: &mut Sink<'_>) -> Result<Flow, QueryError> {
    let items: Vec<Value> = match target {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        other => {
            return Err(QueryError::Type(format!(
                "cannot iterate over {}",
                type_name(&other)
            )));
        }
    };
    for item in items {
        if out(item)? == Flow::Stop {
            return Ok(Flow::Stop);
        }
    }
    Ok(Flow::Continue)
}

/// Cartesian product over entry values, in declaration order.
fn build_object(
    entries: &[(ObjectKey, Expr)],
    input: &Value,
    acc: Map<String, Value>,
    out: &mut Sink<'_>,
) -> Result<Flow, QueryError> {
    let Some(((key, value), rest)) = entries.split_first() else {
        return out(Value::Object(acc));
    };

    let mut with_key = |k: String| {
        eval(value, input, &mut |v| {
            let mut next = acc.clone();
            next.insert(k.clone(), v);
            build_object(rest, input, next, out)
        })
    };

    match key {
        ObjectKey::Literal(k) => with_key(k.clone()),
        ObjectKey::Computed(expr) => eval(expr, input, &mut |k| match k {
            Value::String(k) => with_key(k),
            other => Err(QueryError::Type(format!(
                "object keys must be strings, got {}",
                type_name(&other)
            ))),
        }),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: &Value) -> Result<Value, QueryError> {
    let ord = || compare(&lhs, rhs);
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(ord() == Ordering::Equal)),
        BinaryOp::Ne => return Ok(Value::Bool(ord() != Ordering::Equal)),
        BinaryOp::Lt => return Ok(Value::Bool(ord() == Ordering::Less)),
        BinaryOp::Le => return Ok(Value::Bool(ord() != Ordering::Greater)),
        BinaryOp::Gt => return Ok(Value::Bool(ord() == Ordering::Greater)),
        BinaryOp::Ge => return Ok(Value::Bool(ord() != Ordering::Less)),
        _ => {}
    }

    let mismatch = |verb: &str, lhs: &Value| {
        QueryError::Type(format!(
            "{} and {} cannot be {verb}",
            type_name(lhs),
            type_name(rhs)
        ))
    };

    match (op, lhs, rhs) {
        (BinaryOp::Add, Value::Null, r) => Ok(r.clone()),
        (BinaryOp::Add, l, Value::Null) => Ok(l),
        (BinaryOp::Add, Value::Number(a), Value::Number(b)) => number(as_f64(&a) + as_f64(b)),
        (BinaryOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(a + b)),
        (BinaryOp::Add, Value::Array(mut a), Value::Array(b)) => {
            a.extend(b.iter().cloned());
            Ok(Value::Array(a))
        }
        (BinaryOp::Add, Value::Object(mut a), Value::Object(b)) => {
            a.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::Object(a))
        }
        (BinaryOp::Sub, Value::Number(a), Value::Number(b)) => number(as_f64(&a) - as_f64(b)),
        (BinaryOp::Sub, Value::Array(a), Value::Array(b)) => Ok(Value::Array(
            a.into_iter()
                .filter(|item| !b.iter().any(|x| compare(item, x) == Ordering::Equal))
                .collect(),
        )),
        (BinaryOp::Mul, Value::Number(a), Value::Number(b)) => number(as_f64(&a) * as_f64(b)),
        (BinaryOp::Div, Value::Number(a), Value::Number(b)) => {
            let divisor = as_f64(b);
            if divisor == 0.0 {
                return Err(QueryError::Type("division by zero".to_string()));
            }
            number(as_f64(&a) / divisor)
        }
        (BinaryOp::Mod, Value::Number(a), Value::Number(b)) => {
            let divisor = as_f64(b).trunc() as i64;
            if divisor == 0 {
                return Err(QueryError::Type("modulo by zero".to_string()));
            }
            let rem = (as_f64(&a).trunc() as i64)
                .checked_rem(divisor)
                .ok_or_else(|| QueryError::Type("remainder overflows".to_string()))?;
            number(rem as f64)
        }
        (BinaryOp::Add, l, _) => Err(mismatch("added", &l)),
        (BinaryOp::Sub, l, _) => Err(mismatch("subtracted", &l)),
        (BinaryOp::Mul, l, _) => Err(mismatch("multiplied", &l)),
        (BinaryOp::Div, l, _) => Err(mismatch("divided", &l)),
        (_, l, _) => Err(mismatch("divided (remainder)", &l)),
    }
}

fn call(
    builtin: Builtin,
    args: &[Expr],
    input: &Value,
    out: &mut Sink<'_>,
) -> Result<Flow, QueryError> {
    match builtin {
        Builtin::Empty => Ok(Flow::Continue),
        Builtin::Error => match args.first() {
            None => Err(QueryError::Raised(input.clone())),
            Some(message) => eval(message, input, &mut |m| Err(QueryError::Raised(m))),
        },
        Builtin::Not => out(Value::Bool(!is_truthy(input))),
        Builtin::Length => {
            let len = match input {
                Value::Null => Value::from(0),
                Value::Number(n) => number(as_f64(n).abs())?,
                Value::String(s) => Value::from(s.chars().count()),
                Value::Array(items) => Value::from(items.len()),
                Value::Object(map) => Value::from(map.len()),
                Value::Bool(_) => {
                    return Err(QueryError::Type("boolean has no length".to_string()));
                }
            };
            out(len)
        }
        Builtin::Keys => match input {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out(Value::Array(
                    keys.into_iter().map(|k| Value::String(k.clone())).collect(),
                ))
            }
            Value::Array(items) => out(Value::Array((0..items.len()).map(Value::from).collect())),
            other => Err(QueryError::Type(format!("{} has no keys", type_name(other)))),
        },
        Builtin::Sort => match input {
            Value::Array(items) => {
                let mut sorted = items.clone();
                sorted.sort_by(compare);
                out(Value::Array(sorted))
            }
            other => Err(QueryError::Type(format!(
                "{} cannot be sorted, as it is not an array",
                type_name(other)
            ))),
        },
        Builtin::ToString => match input {
            Value::String(_) => out(input.clone()),
            other => out(Value::String(to_canonical_string(other))),
        },
        Builtin::ToJson => out(Value::String(to_canonical_string(input))),
        Builtin::Select => eval(&args[0], input, &mut |cond| {
            if is_truthy(&cond) {
                out(input.clone())
            } else {
                Ok(Flow::Continue)
            }
        }),
        Builtin::Map => {
            let mut mapped = Vec::new();
            iterate(input.clone(), &mut |item| {
                eval(&args[0], &item, &mut |v| {
                    mapped.push(v);
                    Ok(Flow::Continue)
                })
            })?;
            out(Value::Array(mapped))
        }
        Builtin::Has => eval(&args[0], input, &mut |key| {
            let found = match (input, &key) {
                (Value::Object(map), Value::String(k)) => map.contains_key(k),
                (Value::Array(items), Value::Number(n)) => {
                    let i = as_f64(n);
                    i >= 0.0 && (i as usize) < items.len()
                }
                (t, k) => {
                    return Err(QueryError::Type(format!(
                        "cannot check whether {} has a {} key",
                        type_name(t),
                        type_name(k)
                    )));
                }
            };
            out(Value::Bool(found))
        }),
        Builtin::AsciiDowncase | Builtin::AsciiUpcase => match input {
            Value::String(s) if builtin == Builtin::AsciiDowncase => {
                out(Value::String(s.to_ascii_lowercase()))
            }
            Value::String(s) => out(Value::String(s.to_ascii_uppercase())),
            other => Err(QueryError::Type(format!(
                "{} cannot change case",
                type_name(other)
            ))),
        },
    }
}
