//! Serialized form of the `kubernetes-spec` block and its validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use cairn_model::{SpecResult, SpecValidationError};

use super::client::GroupVersionResource;
use crate::duration::parse_duration;

/// Wait timeout used when the spec names none.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KubernetesSpec {
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_resources: Vec<CreateResource>,
}

/// A named resource rule; the name keys the collected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceEntry {
    #[serde(default)]
    pub name: String,
    pub resource_rule: ResourceRule,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceRule {
    /// Reduces the collection to one object; blank means list everything
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
}

impl ResourceRule {
    pub fn gvr(&self) -> GroupVersionResource {
        GroupVersionResource::new(&self.group, &self.version, &self.resource)
    }
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Navigates into each collected object and replaces it with the leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub jsonpath: String,
    #[serde(rename = "type", default)]
    pub kind: FieldType,
    #[serde(default)]
    pub base64: bool,
}

/// How a string leaf is interpreted after extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Json,
    #[default]
    Yaml,
    String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WaitSpec {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub namespace: Option<String>,
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl WaitSpec {
    pub fn gvr(&self) -> GroupVersionResource {
        GroupVersionResource::new(&self.group, &self.version, &self.resource)
    }

    /// Human-readable target used in logs and errors.
    pub fn target(&self) -> String {
        let mut target = self.resource.clone();
        if let Some(name) = &self.name {
            target = format!("{target}/{name}");
        }
        if let Some(selector) = &self.selector {
            target = format!("{target} [{selector}]");
        }
        if let Some(ns) = &self.namespace {
            target = format!("{target} in {ns}");
        }
        target
    }
}

/// Resources applied to the cluster before collection and removed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateResource {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// A create-resource entry with its manifest documents loaded.
#[derive(Debug, Clone)]
pub(crate) struct PreparedCreate {
    pub name: String,
    pub namespace: Option<String>,
    pub objects: Vec<Value>,
}

impl KubernetesSpec {
    /// Check the spec and return the resolved wait timeout.
    pub(crate) fn validate(&self) -> SpecResult<Option<Duration>> {
        if self.resources.is_empty() && self.create_resources.is_empty() {
            return Err(SpecValidationError::Empty("kubernetes-spec resources"));
        }
        for (idx, entry) in self.resources.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(SpecValidationError::MissingField {
                    item: format!("resource #{idx}"),
                    field: "name",
                });
            }
            let item = format!("resource '{}'", entry.name);
            require(&item, "version", &entry.resource_rule.version)?;
            require(&item, "resource", &entry.resource_rule.resource)?;
            if let Some(field) = &entry.resource_rule.field {
                require(&item, "field.jsonpath", &field.jsonpath)?;
            }
        }

        let Some(wait) = &self.wait else {
            return Ok(None);
        };
        require("wait", "version", &wait.version)?;
        require("wait", "resource", &wait.resource)?;
        let timeout = match wait.timeout.as_deref() {
            Some(raw) => parse_duration(raw).map_err(|reason| SpecValidationError::InvalidField {
                item: "wait".to_string(),
                field: "timeout",
                reason,
            })?,
            None => DEFAULT_WAIT_TIMEOUT,
        };
        Ok(Some(timeout))
    }

    /// Load every create-resource manifest, reading files relative to `base_dir`.
    pub(crate) fn prepare_creates(&self, base_dir: &Path) -> SpecResult<Vec<PreparedCreate>> {
        self.create_resources
            .iter()
            .enumerate()
            .map(|(idx, create)| create.prepare(idx, base_dir))
            .collect()
    }
}

impl CreateResource {
    fn prepare(&self, idx: usize, base_dir: &Path) -> SpecResult<PreparedCreate> {
        if self.name.trim().is_empty() {
            return Err(SpecValidationError::MissingField {
                item: format!("create-resource #{idx}"),
                field: "name",
            });
        }
        let item = format!("create-resource '{}'", self.name);
        let invalid = |field: &'static str, reason: String| SpecValidationError::InvalidField {
            item: item.clone(),
            field,
            reason,
        };

        let source = match (&self.manifest, &self.file) {
            (Some(manifest), None) => manifest.clone(),
            (None, Some(file)) => {
                let path = base_dir.join(file.trim_start_matches("file://"));
                std::fs::read_to_string(&path)
                    .map_err(|e| invalid("file", format!("{}: {e}", path.display())))?
            }
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "manifest",
                    "set either manifest or file, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(SpecValidationError::MissingField {
                    item: item.clone(),
                    field: "manifest",
                })
            }
        };

        let objects = parse_manifest(&source).map_err(|reason| invalid("manifest", reason))?;
        if objects.is_empty() {
            return Err(invalid("manifest", "no documents".to_string()));
        }
        for object in &objects {
            for key in ["apiVersion", "kind"] {
                if object.get(key).and_then(Value::as_str).is_none() {
                    return Err(invalid("manifest", format!("document is missing '{key}'")));
                }
            }
            if super::object_name(object).is_none() {
                return Err(invalid("manifest", "document is missing metadata.name".to_string()));
            }
        }

        Ok(PreparedCreate {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            objects,
        })
    }
}

/// Split a multi-document YAML manifest, skipping empty documents.
fn parse_manifest(source: &str) -> Result<Vec<Value>, String> {
    let mut objects = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(source) {
        let value = Value::deserialize(doc).map_err(|e| e.to_string())?;
        if !value.is_null() {
            objects.push(value);
        }
    }
    Ok(objects)
}

fn require(item: &str, field: &'static str, value: &str) -> SpecResult<()> {
    if value.trim().is_empty() {
        return Err(SpecValidationError::MissingField {
            item: item.to_string(),
            field,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(yaml: &str) -> KubernetesSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_empty_spec_is_rejected() {
        let err = spec("resources: []").validate().unwrap_err();
        assert!(matches!(err, SpecValidationError::Empty(_)));
    }

    #[test]
    fn test_rule_without_version_is_rejected() {
        let err = spec("resources:\n  - name: pods\n    resource-rule:\n      resource: pods\n")
            .validate()
            .unwrap_err();
        assert!(matches!(err, SpecValidationError::MissingField { field: "version", .. }));
    }

    #[test]
    fn test_wait_timeout_defaults_and_parses() {
        let base = r#"
resources:
  - name: pods
    resource-rule:
      version: v1
      resource: pods
"#;
        assert_eq!(spec(base).validate().unwrap(), None);

        let with_wait = format!("{base}wait:\n  version: v1\n  resource: pods\n");
        assert_eq!(spec(&with_wait).validate().unwrap(), Some(DEFAULT_WAIT_TIMEOUT));

        let with_timeout = format!("{with_wait}  timeout: 1s\n");
        assert_eq!(
            spec(&with_timeout).validate().unwrap(),
            Some(Duration::from_secs(1))
        );

        let bad = format!("{with_wait}  timeout: eventually\n");
        assert!(spec(&bad).validate().is_err());

        let huge = format!("{with_wait}  timeout: 9999999999999999999h\n");
        assert!(matches!(
            spec(&huge).validate(),
            Err(SpecValidationError::InvalidField { field: "timeout", .. })
        ));
    }

    #[test]
    fn test_blank_names_mean_unset() {
        let s = spec(
            r#"
resources:
  - name: pods
    resource-rule:
      name: ""
      version: v1
      resource: pods
      namespaces: [ns]
wait:
  version: v1
  resource: pods
  name: " "
  namespace: ""
"#,
        );
        assert_eq!(s.resources[0].resource_rule.name, None);
        let wait = s.wait.as_ref().unwrap();
        assert_eq!(wait.name, None);
        assert_eq!(wait.namespace, None);
        assert_eq!(wait.target(), "pods");
    }

    #[test]
    fn test_field_type_defaults_to_yaml() {
        let field: Field = serde_yaml::from_str("jsonpath: data.config").unwrap();
        assert_eq!(field.kind, FieldType::Yaml);
        assert!(!field.base64);
    }

    #[test]
    fn test_multi_document_manifest_is_split() {
        let s = spec(
            r#"
create-resources:
  - name: fixtures
    manifest: |
      apiVersion: v1
      kind: Namespace
      metadata:
        name: scratch
      ---
      apiVersion: v1
      kind: Pod
      metadata:
        name: probe
"#,
        );
        let prepared = s.prepare_creates(Path::new(".")).unwrap();
        assert_eq!(prepared[0].objects.len(), 2);
        assert_eq!(prepared[0].objects[1]["kind"], "Pod");
    }

    #[test]
    fn test_manifest_file_is_read_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pod.yaml"),
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: probe\n",
        )
        .unwrap();
        let s = spec("create-resources:\n  - name: probe\n    file: pod.yaml\n");
        let prepared = s.prepare_creates(dir.path()).unwrap();
        assert_eq!(prepared[0].objects[0]["metadata"]["name"], "probe");
    }

    #[test]
    fn test_manifest_without_kind_is_rejected() {
        let s = spec(
            r#"
create-resources:
  - name: bad
    manifest: "apiVersion: v1\nmetadata:\n  name: x\n"
"#,
        );
        assert!(s.prepare_creates(Path::new(".")).is_err());
    }
}
