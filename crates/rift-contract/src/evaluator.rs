//! Assertion evaluator.
//!
//! Every expectation is evaluated, in declared order, with no short-circuit: a
//! case with N expectations of which K fail produces exactly K failures.

use crate::engine::ExecutionResult;
use crate::json_path::{type_name, JsonPath};
use crate::report::{Failure, Verdict};
use crate::suite::Expectation;
use serde_json::{Number, Value};

/// Evaluate `expectations` against `result` and produce the case's verdict.
///
/// A transport error always fails the case, even with no expectations.
pub fn evaluate(case_id: &str, result: &ExecutionResult, expectations: &[Expectation]) -> Verdict {
    let mut failures: Vec<Failure> = expectations
        .iter()
        .filter_map(|expectation| check(result, expectation).err())
        .collect();
    match &result.error {
        Some(error) if failures.is_empty() => failures.push(Failure {
            expectation: None,
            actual: None,
            message: format!("transport error: {error}"),
        }),
        _ => {}
    }
    Verdict::from_failures(case_id, failures, result.status, result.elapsed)
}

/// Evaluate a single expectation.
pub fn check(result: &ExecutionResult, expectation: &Expectation) -> Result<(), Failure> {
    let fail = |actual: Option<Value>, message: String| Failure {
        expectation: Some(expectation.clone()),
        actual,
        message,
    };

    if let Some(error) = &result.error {
        return Err(fail(None, format!("transport error: {error}")));
    }

    match expectation {
        Expectation::StatusEquals { expected } => match result.status {
            Some(status) if status == *expected => Ok(()),
            Some(status) => Err(fail(
                Some(Value::from(status)),
                format!("expected status {expected}, got {status}"),
            )),
            None => Err(fail(None, format!("expected status {expected}, got no response"))),
        },
        Expectation::FieldPresent { path } => {
            lookup(result, path).map(|_| ()).map_err(|message| {
                fail(None, format!("expected '{path}' to be present: {message}"))
            })
        }
        Expectation::FieldEquals { path, expected } => {
            let actual = lookup(result, path).map_err(|message| fail(None, message))?;
            if json_equals(actual, expected) {
                Ok(())
            } else {
                Err(fail(
                    Some(actual.clone()),
                    format!("expected '{path}' to equal {expected}, got {actual}"),
                ))
            }
        }
        Expectation::FieldContains { path, expected } => {
            let actual = lookup(result, path).map_err(|message| fail(None, message))?;
            match contains(actual, expected) {
                Ok(true) => Ok(()),
                Ok(false) => Err(fail(
                    Some(actual.clone()),
                    format!("expected '{path}' to contain {expected}, got {actual}"),
                )),
                Err(reason) => Err(fail(Some(actual.clone()), format!("'{path}': {reason}"))),
            }
        }
    }
}

fn lookup<'a>(result: &'a ExecutionResult, path: &JsonPath) -> Result<&'a Value, String> {
    let body = match (&result.parsed_body, &result.parse_error) {
        (Some(body), _) => body,
        (None, Some(error)) => return Err(format!("response body is not valid JSON ({error})")),
        (None, None) => return Err("response body is empty".to_string()),
    };
    path.resolve(body).map_err(|e| e.to_string())
}

/// JSON equality where numbers compare by value (`1 == 1.0`).
pub fn json_equals(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| json_equals(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| json_equals(x, y)))
        }
        _ => actual == expected,
    }
}

/// Integers compare exactly; floats only come in when either side is one.
fn numbers_equal(a: &Number, b: &Number) -> bool {
    if a.is_f64() || b.is_f64() {
        return matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y);
    }
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        // at least one side is above i64::MAX
        _ => a.as_u64().is_some() && a.as_u64() == b.as_u64(),
    }
}

/// Substring on strings, element membership on arrays, value membership on
/// objects. Anything else is a type mismatch.
pub fn contains(actual: &Value, expected: &Value) -> Result<bool, String> {
    match actual {
        Value::String(haystack) => match expected {
            Value::String(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(format!(
                "cannot search a string for {} {other}",
                type_name(other)
            )),
        },
        Value::Array(items) => Ok(items.iter().any(|item| json_equals(item, expected))),
        Value::Object(map) => Ok(map.values().any(|item| json_equals(item, expected))),
        other => Err(format!(
            "expected a string, an array or an object but found {}",
            type_name(other)
        )),
    }
}
