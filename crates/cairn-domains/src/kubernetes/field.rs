//! Field extraction from collected objects.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use cairn_model::{lookup_path, CollectionError, CollectionResult};

use super::spec::{Field, FieldType};

/// Navigate `field.jsonpath` inside `object` and interpret the leaf.
///
/// String leaves are optionally base64-decoded, then parsed according to
/// `field.kind`. Non-string leaves are returned unchanged.
pub fn extract_field(object: &Value, field: &Field) -> CollectionResult<Value> {
    let path = field.jsonpath.trim().trim_start_matches('.');
    let fail = |reason: String| CollectionError::FieldExtraction {
        path: field.jsonpath.clone(),
        reason,
    };

    let leaf = lookup_path(object, path).ok_or_else(|| fail("path not found".to_string()))?;
    let Some(raw) = leaf.as_str() else {
        if field.base64 {
            return Err(fail("base64 decoding requires a string value".to_string()));
        }
        return Ok(leaf.clone());
    };

    let text = if field.base64 {
        let bytes = STANDARD
            .decode(raw.trim())
            .map_err(|e| fail(format!("invalid base64: {e}")))?;
        String::from_utf8(bytes).map_err(|e| fail(format!("decoded value is not UTF-8: {e}")))?
    } else {
        raw.to_string()
    };

    match field.kind {
        FieldType::String => Ok(Value::String(text)),
        FieldType::Json => {
            serde_json::from_str(&text).map_err(|e| fail(format!("invalid JSON: {e}")))
        }
        FieldType::Yaml => {
            serde_yaml::from_str(&text).map_err(|e| fail(format!("invalid YAML: {e}")))
        }
    }
}

/// Drop `metadata.managedFields`, which is server bookkeeping and never evidence.
pub fn strip_managed_fields(object: &mut Value) {
    if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("managedFields");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(path: &str, kind: FieldType, base64: bool) -> Field {
        Field {
            jsonpath: path.to_string(),
            kind,
            base64,
        }
    }

    fn configmap() -> Value {
        json!({
            "metadata": {"name": "cfg", "managedFields": [{"manager": "kubectl"}]},
            "data": {
                "settings.yaml": "replicas: 3\nmode: strict\n",
                "settings.json": "{\"replicas\": 3}",
                "encoded": "cmVwbGljYXM6IDMK",
                "plain": "hello"
            },
            "spec": {"containers": [{"name": "app"}, {"name": "sidecar"}]}
        })
    }

    #[test]
    fn test_yaml_is_default_parse() {
        let mut obj = configmap();
        obj["data"]["settings"] = json!("replicas: 3\nmode: strict\n");
        let out = extract_field(&obj, &field("data.settings", FieldType::Yaml, false)).unwrap();
        assert_eq!(out, json!({"replicas": 3, "mode": "strict"}));
    }

    #[test]
    fn test_json_parse() {
        let mut obj = configmap();
        obj["data"]["cfg"] = obj["data"]["settings.json"].clone();
        let out = extract_field(&obj, &field("data.cfg", FieldType::Json, false)).unwrap();
        assert_eq!(out, json!({"replicas": 3}));
    }

    #[test]
    fn test_base64_then_yaml() {
        let encoded = field("data.encoded", FieldType::Yaml, true);
        let out = extract_field(&configmap(), &encoded).unwrap();
        assert_eq!(out, json!({"replicas": 3}));
    }

    #[test]
    fn test_string_kept_verbatim() {
        let plain = field(".data.plain", FieldType::String, false);
        let out = extract_field(&configmap(), &plain).unwrap();
        assert_eq!(out, json!("hello"));
    }

    #[test]
    fn test_array_index_segment() {
        let out =
            extract_field(&configmap(), &field("spec.containers.1.name", FieldType::String, false))
                .unwrap();
        assert_eq!(out, json!("sidecar"));
    }

    #[test]
    fn test_non_string_leaf_returned_as_is() {
        let containers = field("spec.containers", FieldType::Yaml, false);
        let out = extract_field(&configmap(), &containers).unwrap();
        assert_eq!(out.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_path_errors() {
        let missing = field("data.nope", FieldType::Yaml, false);
        let err = extract_field(&configmap(), &missing).unwrap_err();
        assert!(matches!(err, CollectionError::FieldExtraction { .. }));
    }

    #[test]
    fn test_strip_managed_fields() {
        let mut obj = configmap();
        strip_managed_fields(&mut obj);
        assert!(obj["metadata"].get("managedFields").is_none());
        assert_eq!(obj["metadata"]["name"], "cfg");
    }
}
