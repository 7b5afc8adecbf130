//! Value helpers: jq ordering, truthiness, number arithmetic.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::QueryError;

/// jq's total order: null < false < true < numbers < strings < arrays < objects.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    let rank = |v: &Value| match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    };

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => as_f64(x).total_cmp(&as_f64(y)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut xk: Vec<&String> = x.keys().collect();
            let mut yk: Vec<&String> = y.keys().collect();
            xk.sort();
            yk.sort();
            let keys = xk.cmp(&yk);
            if keys != Ordering::Equal {
                return keys;
            }
            for key in xk {
                let ord = compare(&x[key], &y[key]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

pub(crate) fn is_truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

pub(crate) fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

/// Integral results stay integers so `1 + 2` serializes as `3`, not `3.0`.
pub(crate) fn number(f: f64) -> Result<Value, QueryError> {
    if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
        return Ok(Value::Number(Number::from(f as i64)));
    }
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| QueryError::Type(format!("number {f} is not representable")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ordering_follows_type_rank() {
        let mut values = vec![
            json!({"a": 1}),
            json!([1]),
            json!("s"),
            json!(3),
            json!(true),
            json!(false),
            json!(null),
        ];
        values.sort_by(compare);
        assert_eq!(
            values,
            vec![
                json!(null),
                json!(false),
                json!(true),
                json!(3),
                json!("s"),
                json!([1]),
                json!({"a": 1})
            ]
        );
    }

    #[test]
    fn integer_and_float_compare_equal() {
        assert_eq!(compare(&json!(1), &json!(1.0)), Ordering::Equal);
    }

    #[test]
    fn integral_floats_become_integers() {
        assert_eq!(number(3.0).unwrap(), json!(3));
        assert_eq!(number(0.5).unwrap(), json!(0.5));
        assert!(number(f64::INFINITY).is_err());
    }
}
