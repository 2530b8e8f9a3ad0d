//! The collected resource tree.
//!
//! Domains produce a [`Resources`] map keyed by the names their configuration
//! declares; providers receive it as their whole input. Values are plain
//! `serde_json::Value` trees (object, array, string, number, bool, null).

use serde_json::Value;

/// Collected resources keyed by rule or request name.
pub type Resources = serde_json::Map<String, Value>;

/// Split a dotted path into its segments.
///
/// A leading `.` is accepted (`.metadata.name` and `metadata.name` are the
/// same path). Empty segments are dropped.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Navigate `path` segment by segment through nested objects.
///
/// Numeric segments index into arrays. Returns `None` when any segment is
/// missing or the value at that point is a scalar.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path_segments(path) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_object() {
        let v = json!({"metadata": {"labels": {"foo": "bar"}}});
        assert_eq!(lookup_path(&v, "metadata.labels.foo"), Some(&json!("bar")));
        assert_eq!(lookup_path(&v, ".metadata.labels.foo"), Some(&json!("bar")));
    }

    #[test]
    fn test_lookup_array_index() {
        let v = json!({"spec": {"containers": [{"name": "a"}, {"name": "b"}]}});
        assert_eq!(lookup_path(&v, "spec.containers.1.name"), Some(&json!("b")));
        assert_eq!(lookup_path(&v, "spec.containers.7.name"), None);
    }

    #[test]
    fn test_lookup_through_scalar_is_none() {
        let v = json!({"data": "text"});
        assert_eq!(lookup_path(&v, "data.inner"), None);
    }

    #[test]
    fn test_empty_path_returns_root() {
        let v = json!({"a": 1});
        assert_eq!(lookup_path(&v, ""), Some(&v));
    }
}
