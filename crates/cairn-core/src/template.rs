//! Placeholder rendering for validation documents.
//!
//! `{{ .const.<path> }}` reads a dotted path out of the configured constants,
//! `{{ .var.<key> }}` a variable. Unknown placeholders are left in place.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use cairn_model::lookup_path;

/// Replacement for sensitive variables in [`RenderMode::Masked`].
pub const MASK: &str = "********";

/// Which placeholders a render substitutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// Constants only
    Constants,
    /// Constants and non-sensitive variables
    NonSensitive,
    /// Everything, with sensitive variables masked
    Masked,
    /// Everything
    All,
}

/// A variable value available to templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub value: String,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    constants: Value,
    variables: BTreeMap<String, Variable>,
}

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*\.(const|var)\.([A-Za-z0-9_\-.]+)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

impl TemplateRenderer {
    pub fn new(
        constants: serde_json::Map<String, Value>,
        variables: BTreeMap<String, Variable>,
    ) -> Self {
        Self {
            constants: Value::Object(constants),
            variables,
        }
    }

    pub fn render(&self, document: &str, mode: RenderMode) -> String {
        placeholder()
            .replace_all(document, |caps: &Captures| {
                let key = &caps[2];
                let replacement = match &caps[1] {
                    "const" => self.constant(key),
                    _ => self.variable(key, mode),
                };
                replacement.unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn constant(&self, path: &str) -> Option<String> {
        match lookup_path(&self.constants, path) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => {
                debug!(key = %path, "unknown constant left unrendered");
                None
            }
        }
    }

    fn variable(&self, key: &str, mode: RenderMode) -> Option<String> {
        let Some(var) = self.variables.get(key) else {
            debug!(key = %key, "unknown variable left unrendered");
            return None;
        };
        match (mode, var.sensitive) {
            (RenderMode::Constants, _) => None,
            (RenderMode::NonSensitive, true) => None,
            (RenderMode::Masked, true) => Some(MASK.to_string()),
            _ => Some(var.value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn renderer() -> TemplateRenderer {
        let constants = json!({
            "istio": {"namespace": "istio-system"},
            "replicas": 3,
        });
        let mut variables = BTreeMap::new();
        variables.insert(
            "region".to_string(),
            Variable {
                value: "eu-west-1".to_string(),
                sensitive: false,
            },
        );
        variables.insert(
            "token".to_string(),
            Variable {
                value: "s3cret".to_string(),
                sensitive: true,
            },
        );
        let Value::Object(map) = constants else {
            unreachable!()
        };
        TemplateRenderer::new(map, variables)
    }

    const DOC: &str = r#"ns: {{ .const.istio.namespace }}
n: {{.const.replicas}}
r: {{ .var.region }}
t: {{ .var.token }}
"#;

    #[test]
    fn test_all_mode_renders_everything() {
        assert_eq!(
            renderer().render(DOC, RenderMode::All),
            "ns: istio-system\nn: 3\nr: eu-west-1\nt: s3cret\n"
        );
    }

    #[test]
    fn test_masked_mode_hides_sensitive() {
        let out = renderer().render(DOC, RenderMode::Masked);
        assert!(out.contains("t: ********"));
        assert!(out.contains("r: eu-west-1"));
    }

    #[test]
    fn test_non_sensitive_leaves_sensitive_placeholder() {
        let out = renderer().render(DOC, RenderMode::NonSensitive);
        assert!(out.contains("t: {{ .var.token }}"));
        assert!(out.contains("r: eu-west-1"));
    }

    #[test]
    fn test_constants_mode_skips_variables() {
        let out = renderer().render(DOC, RenderMode::Constants);
        assert!(out.contains("ns: istio-system"));
        assert!(out.contains("r: {{ .var.region }}"));
    }

    #[test]
    fn test_unknown_keys_left_as_is() {
        let doc = "{{ .const.missing.path }} {{ .var.nope }} {{ .other.x }}";
        assert_eq!(renderer().render(doc, RenderMode::All), doc);
    }
}
