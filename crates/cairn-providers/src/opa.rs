//! Rego provider backed by `regorus`.
//!
//! The resources map is bound as `input`. The validation path (default
//! `validate.validate`) is evaluated as `data.<path>`:
//!
//! | value              | outcome                     |
//! |--------------------|-----------------------------|
//! | `true`             | one passing                 |
//! | `false`, undefined | one failing                 |
//! | array of booleans  | one outcome per element     |
//! | anything else      | `EvaluationError`           |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use cairn_model::{
    EvaluationError, EvaluationResult, Provider, Resources, SpecResult, SpecValidationError,
    ValidationResult,
};

/// Rule evaluated when `output.validation` is not set.
pub const DEFAULT_VALIDATION_PATH: &str = "validate.validate";

const POLICY_FILE: &str = "validation.rego";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpaSpec {
    #[serde(default)]
    pub rego: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OpaOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpaOutput {
    #[serde(default = "default_validation_path")]
    pub validation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observations: Vec<String>,
}

fn default_validation_path() -> String {
    DEFAULT_VALIDATION_PATH.to_string()
}

#[derive(Debug, Clone)]
pub struct OpaProvider {
    rego: String,
    validation_path: String,
    observation_paths: Vec<String>,
}

fn rule_path(path: &str) -> String {
    format!("data.{}", path.trim().trim_start_matches("data."))
}

impl OpaProvider {
    /// Check that the policy parses and resolve the output paths.
    pub fn new(spec: OpaSpec) -> SpecResult<Self> {
        if spec.rego.trim().is_empty() {
            return Err(SpecValidationError::MissingField {
                item: "opa provider".to_string(),
                field: "rego",
            });
        }
        regorus::Engine::new()
            .add_policy(POLICY_FILE.to_string(), spec.rego.clone())
            .map_err(|e| SpecValidationError::InvalidField {
                item: "opa provider".to_string(),
                field: "rego",
                reason: e.to_string(),
            })?;

        let (validation_path, observation_paths) = match spec.output {
            Some(output) => (output.validation, output.observations),
            None => (default_validation_path(), Vec::new()),
        };
        Ok(Self {
            rego: spec.rego,
            validation_path,
            observation_paths,
        })
    }

    fn engine(&self, resources: &Resources) -> EvaluationResult<regorus::Engine> {
        let mut engine = regorus::Engine::new();
        engine
            .add_policy(POLICY_FILE.to_string(), self.rego.clone())
            .map_err(|e| EvaluationError::PolicyLoad(e.to_string()))?;
        let input = regorus::Value::from_json_str(&serde_json::to_string(resources)?)
            .map_err(|e| EvaluationError::Engine(e.to_string()))?;
        engine.set_input(input);
        Ok(engine)
    }

    /// Evaluate `path`; `None` when the rule is undefined.
    fn eval(&self, engine: &mut regorus::Engine, path: &str) -> EvaluationResult<Option<Value>> {
        let value = engine
            .eval_rule(rule_path(path))
            .map_err(|e| EvaluationError::Engine(e.to_string()))?;
        if value == regorus::Value::Undefined {
            return Ok(None);
        }
        let json = value
            .to_json_str()
            .map_err(|e| EvaluationError::Engine(e.to_string()))?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}

impl Provider for OpaProvider {
    fn kind(&self) -> &'static str {
        "opa"
    }

    fn evaluate(&self, resources: &Resources) -> EvaluationResult<ValidationResult> {
        let mut result = ValidationResult::empty();
        if resources.is_empty() {
            return Ok(result);
        }

        let mut engine = self.engine(resources)?;
        match self.eval(&mut engine, &self.validation_path)? {
            Some(Value::Bool(true)) => result.pass(),
            Some(Value::Bool(false)) | None => result.fail(),
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::Bool(true) => result.pass(),
                        Value::Bool(false) => result.fail(),
                        other => {
                            return Err(EvaluationError::UnexpectedOutput {
                                path: self.validation_path.clone(),
                                found: other.to_string(),
                            })
                        }
                    }
                }
            }
            Some(other) => {
                return Err(EvaluationError::UnexpectedOutput {
                    path: self.validation_path.clone(),
                    found: other.to_string(),
                })
            }
        }

        for path in &self.observation_paths {
            match self.eval(&mut engine, path)? {
                Some(Value::String(text)) => result.observe(path.clone(), text),
                Some(other) => result.observe(path.clone(), other.to_string()),
                None => debug!(path = %path, "observation undefined"),
            }
        }

        debug!(passing = result.passing, failing = result.failing, "rego evaluated");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(rego: &str, output: Option<OpaOutput>) -> OpaProvider {
        OpaProvider::new(OpaSpec {
            rego: rego.to_string(),
            output,
        })
        .unwrap()
    }

    fn resources(value: Value) -> Resources {
        value.as_object().unwrap().clone()
    }

    const REPLICAS: &str = r#"
package validate
import rego.v1

default validate := false

validate if input.deploy.spec.replicas >= 2

msg := sprintf("replicas: %d", [input.deploy.spec.replicas])
"#;

    #[test]
    fn test_true_counts_one_passing() {
        let p = provider(REPLICAS, None);
        let r = p
            .evaluate(&resources(json!({"deploy": {"spec": {"replicas": 3}}})))
            .unwrap();
        assert_eq!((r.passing, r.failing), (1, 0));
    }

    #[test]
    fn test_false_counts_one_failing() {
        let p = provider(REPLICAS, None);
        let r = p
            .evaluate(&resources(json!({"deploy": {"spec": {"replicas": 1}}})))
            .unwrap();
        assert_eq!((r.passing, r.failing), (0, 1));
    }

    #[test]
    fn test_undefined_counts_as_failing() {
        let p = provider("package validate\nimport rego.v1\n\nvalidate if input.nope == 1\n", None);
        let r = p.evaluate(&resources(json!({"x": 1}))).unwrap();
        assert_eq!((r.passing, r.failing), (0, 1));
    }

    #[test]
    fn test_observations_recorded_by_path() {
        let p = provider(
            REPLICAS,
            Some(OpaOutput {
                validation: DEFAULT_VALIDATION_PATH.to_string(),
                observations: vec!["validate.msg".to_string()],
            }),
        );
        let r = p
            .evaluate(&resources(json!({"deploy": {"spec": {"replicas": 2}}})))
            .unwrap();
        assert_eq!(r.observations["validate.msg"], "replicas: 2");
    }

    #[test]
    fn test_custom_validation_path() {
        let rego = "package checks\nimport rego.v1\n\nok if input.a == 1\n";
        let p = provider(
            rego,
            Some(OpaOutput {
                validation: "checks.ok".to_string(),
                observations: vec![],
            }),
        );
        let r = p.evaluate(&resources(json!({"a": 1}))).unwrap();
        assert_eq!(r.passing, 1);
    }

    #[test]
    fn test_non_boolean_output_is_an_error() {
        let rego = "package validate\nimport rego.v1\n\nvalidate := \"yes\"\n";
        let err = provider(rego, None)
            .evaluate(&resources(json!({"a": 1})))
            .unwrap_err();
        assert!(matches!(err, EvaluationError::UnexpectedOutput { .. }));
    }

    #[test]
    fn test_empty_resources_short_circuit() {
        let r = provider(REPLICAS, None).evaluate(&Resources::new()).unwrap();
        assert_eq!(r, ValidationResult::empty());
    }

    #[test]
    fn test_unparseable_policy_is_spec_error() {
        let err = OpaProvider::new(OpaSpec {
            rego: "package validate\nvalidate if {{{".to_string(),
            output: None,
        })
        .unwrap_err();
        assert!(matches!(err, SpecValidationError::InvalidField { field: "rego", .. }));
    }

    #[test]
    fn test_output_validation_defaults_when_omitted() {
        let output: OpaOutput =
            serde_json::from_value(json!({"observations": ["validate.msg"]})).unwrap();
        assert_eq!(output.validation, DEFAULT_VALIDATION_PATH);
    }
}
