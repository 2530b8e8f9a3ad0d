//! Structural pattern matching for assertion checks.
//!
//! A pattern is a JSON tree compared against a value:
//!
//! - object keys must exist in the value and match recursively
//! - a `(expr)` key projects `expr` from the value: a dotted path, `@` for
//!   the value itself, or `length(expr)`
//! - a `~.key` (or `~.(expr)`) key iterates the array found there and matches
//!   every element
//! - arrays match element-wise and must have equal length
//! - strings support `*` and `?` wildcards
//! - other scalars compare by equality

use std::borrow::Cow;

use serde_json::Value;
use thiserror::Error;

use cairn_model::lookup_path;

/// The pattern itself cannot be applied. Distinct from a mismatch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatternError {
    #[error("unsupported projection '{0}'")]
    Projection(String),

    #[error("length() of {path} which is not a collection")]
    NotMeasurable { path: String },

    #[error("cannot iterate {path}: not an array")]
    NotIterable { path: String },
}

/// Compare `pattern` against `value`.
///
/// Returns `Ok(None)` on a match and `Ok(Some(description))` for the first
/// mismatch found.
pub fn check(pattern: &Value, value: &Value) -> Result<Option<String>, PatternError> {
    compare(pattern, value, "")
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn shown(path: &str) -> &str {
    if path.is_empty() {
        "$"
    } else {
        path
    }
}

fn compare(pattern: &Value, value: &Value, path: &str) -> Result<Option<String>, PatternError> {
    match pattern {
        Value::Object(fields) => {
            if !value.is_object() {
                return Ok(Some(format!("{}: expected an object", shown(path))));
            }
            for (key, sub) in fields {
                if let Some(rest) = key.strip_prefix("~.") {
                    let child_path = join(path, rest);
                    let target = resolve(rest, value, &child_path)?;
                    let Some(target) = target else {
                        return Ok(Some(format!("{child_path}: not found")));
                    };
                    let Value::Array(items) = target.as_ref() else {
                        return Err(PatternError::NotIterable { path: child_path });
                    };
                    for (idx, item) in items.iter().enumerate() {
                        let item_path = format!("{child_path}[{idx}]");
                        if let Some(mismatch) = compare(sub, item, &item_path)? {
                            return Ok(Some(mismatch));
                        }
                    }
                } else {
                    let child_path = join(path, key);
                    match resolve(key, value, &child_path)? {
                        Some(target) => {
                            if let Some(mismatch) = compare(sub, &target, &child_path)? {
                                return Ok(Some(mismatch));
                            }
                        }
                        None => return Ok(Some(format!("{child_path}: not found"))),
                    }
                }
            }
            Ok(None)
        }
        Value::Array(expected) => {
            let Value::Array(actual) = value else {
                return Ok(Some(format!("{}: expected an array", shown(path))));
            };
            if expected.len() != actual.len() {
                return Ok(Some(format!(
                    "{}: expected {} elements, got {}",
                    shown(path),
                    expected.len(),
                    actual.len()
                )));
            }
            for (idx, (p, v)) in expected.iter().zip(actual).enumerate() {
                if let Some(mismatch) = compare(p, v, &format!("{path}[{idx}]"))? {
                    return Ok(Some(mismatch));
                }
            }
            Ok(None)
        }
        Value::String(expected) => {
            let actual = match value {
                Value::String(s) => Cow::Borrowed(s.as_str()),
                Value::Number(n) => Cow::Owned(n.to_string()),
                Value::Bool(b) => Cow::Owned(b.to_string()),
                _ => return Ok(Some(mismatch(path, pattern, value))),
            };
            if wildcard_match(expected, &actual) {
                Ok(None)
            } else {
                Ok(Some(mismatch(path, pattern, value)))
            }
        }
        Value::Number(expected) => {
            let equal = match value {
                Value::Number(actual) => expected.as_f64() == actual.as_f64(),
                _ => false,
            };
            Ok((!equal).then(|| mismatch(path, pattern, value)))
        }
        _ => Ok((pattern != value).then(|| mismatch(path, pattern, value))),
    }
}

fn mismatch(path: &str, pattern: &Value, value: &Value) -> String {
    format!("{}: expected {pattern}, got {value}", shown(path))
}

/// Resolve a pattern key against `value`. Plain keys return `None` when
/// absent; projections return `Null` instead.
fn resolve<'a>(
    key: &str,
    value: &'a Value,
    path: &str,
) -> Result<Option<Cow<'a, Value>>, PatternError> {
    match key.strip_prefix('(').and_then(|k| k.strip_suffix(')')) {
        Some(expr) => project(expr.trim(), value, path).map(Some),
        None => Ok(value.get(key).map(Cow::Borrowed)),
    }
}

fn project<'a>(expr: &str, value: &'a Value, path: &str) -> Result<Cow<'a, Value>, PatternError> {
    if expr == "@" {
        return Ok(Cow::Borrowed(value));
    }
    if let Some(inner) = expr.strip_prefix("length(").and_then(|e| e.strip_suffix(')')) {
        let target = project(inner.trim(), value, path)?;
        let len = match target.as_ref() {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::String(s) => s.chars().count(),
            _ => {
                return Err(PatternError::NotMeasurable {
                    path: path.to_string(),
                })
            }
        };
        return Ok(Cow::Owned(Value::from(len)));
    }
    let is_path = !expr.is_empty()
        && expr
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
    if !is_path {
        return Err(PatternError::Projection(expr.to_string()));
    }
    Ok(lookup_path(value, expr)
        .map(Cow::Borrowed)
        .unwrap_or(Cow::Owned(Value::Null)))
}

/// Glob match where `*` spans any run of characters and `?` exactly one.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_object_match() {
        let pod = json!({"metadata": {"labels": {"app": "web", "tier": "front"}}});
        assert_eq!(check(&json!({"metadata": {"labels": {"app": "web"}}}), &pod), Ok(None));
        let miss = check(&json!({"metadata": {"labels": {"app": "db"}}}), &pod)
            .unwrap()
            .unwrap();
        assert!(miss.starts_with("metadata.labels.app"));
    }

    #[test]
    fn test_missing_key_is_mismatch() {
        let miss = check(&json!({"spec": {"hostNetwork": false}}), &json!({"spec": {}}))
            .unwrap()
            .unwrap();
        assert_eq!(miss, "spec.hostNetwork: not found");
    }

    #[test]
    fn test_iteration_over_array() {
        let doc = json!({"pods": [
            {"metadata": {"name": "a", "labels": {"foo": "bar"}}},
            {"metadata": {"name": "b", "labels": {}}}
        ]});
        let miss = check(&json!({"~.pods": {"metadata": {"labels": {"foo": "bar"}}}}), &doc)
            .unwrap()
            .unwrap();
        assert!(miss.starts_with("pods[1]"));
    }

    #[test]
    fn test_iterating_a_non_array_is_an_error() {
        let err = check(&json!({"~.pods": {}}), &json!({"pods": {"a": 1}})).unwrap_err();
        assert!(matches!(err, PatternError::NotIterable { .. }));
    }

    #[test]
    fn test_length_projection() {
        let doc = json!({"spec": {"containers": [{"name": "a"}, {"name": "b"}]}});
        assert_eq!(check(&json!({"(length(spec.containers))": 2}), &doc), Ok(None));
        assert!(check(&json!({"(length(spec.containers))": 1}), &doc)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_path_projection_missing_is_null() {
        let doc = json!({"spec": {}});
        assert_eq!(check(&json!({"(spec.hostPID)": null}), &doc), Ok(None));
    }

    #[test]
    fn test_unsupported_projection_errors() {
        let err = check(&json!({"(to_upper(name))": "X"}), &json!({"name": "x"})).unwrap_err();
        assert!(matches!(err, PatternError::Projection(_)));
    }

    #[test]
    fn test_arrays_compare_element_wise() {
        assert_eq!(check(&json!(["a*", 1]), &json!(["abc", 1])), Ok(None));
        assert!(check(&json!(["a"]), &json!(["a", "b"])).unwrap().is_some());
    }

    #[test]
    fn test_wildcards() {
        assert!(wildcard_match("nginx:*", "nginx:1.25"));
        assert!(wildcard_match("v?", "v1"));
        assert!(!wildcard_match("v?", "v12"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*-prod-*", "eu-prod-01"));
        assert!(!wildcard_match("abc", "abd"));
    }

    #[test]
    fn test_scalars_compare_by_equality() {
        assert_eq!(check(&json!(true), &json!(true)), Ok(None));
        assert!(check(&json!(false), &json!(true)).unwrap().is_some());
        assert_eq!(check(&json!(2), &json!(2.0)), Ok(None));
        assert_eq!(check(&json!("true"), &json!(true)), Ok(None));
    }
}
