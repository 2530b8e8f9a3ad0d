//! Assertion-policy provider.
//!
//! Each rule of a `ValidatingPolicy` is checked against the whole resource
//! map. Rules are identified as `<policy>.<rule>`; the optional output filters
//! restrict which rules count toward the result and which record
//! observations. An empty filter admits every rule.

mod pattern;
mod policy;

pub use pattern::{check, wildcard_match, PatternError};
pub use policy::{
    AssertBlock, Assertion, MatchBlock, PolicyMetadata, PolicyRule, PolicySpec, ValidatingPolicy,
};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use cairn_model::{
    EvaluationResult, Provider, Resources, SpecResult, SpecValidationError, ValidationResult,
};

/// Index of the policy within a provider; one policy per provider.
const POLICY_INDEX: usize = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KyvernoSpec {
    pub policy: ValidatingPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<KyvernoOutput>,
}

/// `policy.rule` filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KyvernoOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observations: Vec<String>,
}

/// Outcome of one rule against the payload.
#[derive(Debug, Clone, PartialEq)]
enum RuleOutcome {
    NotApplicable,
    Pass,
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct KyvernoProvider {
    policy: ValidatingPolicy,
    validations: BTreeSet<String>,
    observations: BTreeSet<String>,
}

impl KyvernoProvider {
    pub fn new(spec: KyvernoSpec) -> SpecResult<Self> {
        let policy = spec.policy;
        let item = "kyverno provider".to_string();
        if policy.metadata.name.trim().is_empty() {
            return Err(SpecValidationError::MissingField {
                item,
                field: "policy.metadata.name",
            });
        }
        if policy.spec.rules.is_empty() {
            return Err(SpecValidationError::Empty("kyverno policy rules"));
        }

        let mut known = BTreeSet::new();
        for (idx, rule) in policy.spec.rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(SpecValidationError::MissingField {
                    item: format!("kyverno rule #{idx}"),
                    field: "name",
                });
            }
            if rule.assert.is_empty() {
                return Err(SpecValidationError::MissingField {
                    item: format!("kyverno rule '{}'", rule.name),
                    field: "assert",
                });
            }
            if !known.insert(format!("{}.{}", policy.metadata.name, rule.name)) {
                return Err(SpecValidationError::InvalidField {
                    item: format!("kyverno rule '{}'", rule.name),
                    field: "name",
                    reason: "duplicate rule name".to_string(),
                });
            }
        }

        let output = spec.output.unwrap_or_default();
        for (field, entries) in [
            ("output.validations", &output.validations),
            ("output.observations", &output.observations),
        ] {
            if let Some(unknown) = entries.iter().find(|e| !known.contains(*e)) {
                return Err(SpecValidationError::InvalidField {
                    item: item.clone(),
                    field,
                    reason: format!("'{unknown}' names no policy rule"),
                });
            }
        }

        Ok(Self {
            policy,
            validations: output.validations.into_iter().collect(),
            observations: output.observations.into_iter().collect(),
        })
    }

    fn counts(&self, id: &str) -> bool {
        self.validations.is_empty() || self.validations.contains(id)
    }

    fn observes(&self, id: &str) -> bool {
        self.observations.is_empty() || self.observations.contains(id)
    }
}

fn block_matches(block: &MatchBlock, payload: &Value) -> Result<bool, PatternError> {
    let mut any_ok = block.any.is_empty();
    for pattern in &block.any {
        if check(pattern, payload)?.is_none() {
            any_ok = true;
            break;
        }
    }
    if !any_ok {
        return Ok(false);
    }
    for pattern in &block.all {
        if check(pattern, payload)?.is_some() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate_rule(rule: &PolicyRule, payload: &Value) -> Result<RuleOutcome, PatternError> {
    if let Some(block) = &rule.matching {
        if !block_matches(block, payload)? {
            return Ok(RuleOutcome::NotApplicable);
        }
    }
    if let Some(block) = &rule.exclude {
        if !block.is_empty() && block_matches(block, payload)? {
            return Ok(RuleOutcome::NotApplicable);
        }
    }

    let mut violations = Vec::new();
    for assertion in &rule.assert.all {
        if let Some(mismatch) = check(&assertion.check, payload)? {
            violations.push(assertion.message.clone().unwrap_or(mismatch));
        }
    }
    if !rule.assert.any.is_empty() {
        let mut first_failure = None;
        let mut satisfied = false;
        for assertion in &rule.assert.any {
            match check(&assertion.check, payload)? {
                None => {
                    satisfied = true;
                    break;
                }
                Some(mismatch) => {
                    first_failure
                        .get_or_insert_with(|| assertion.message.clone().unwrap_or(mismatch));
                }
            }
        }
        if !satisfied {
            violations.extend(first_failure);
        }
    }

    Ok(match violations.into_iter().next() {
        Some(message) => RuleOutcome::Fail(message),
        None => RuleOutcome::Pass,
    })
}

impl Provider for KyvernoProvider {
    fn kind(&self) -> &'static str {
        "kyverno"
    }

    fn evaluate(&self, resources: &Resources) -> EvaluationResult<ValidationResult> {
        let mut result = ValidationResult::empty();
        if resources.is_empty() {
            return Ok(result);
        }
        let payload = Value::Object(resources.clone());
        let policy_name = &self.policy.metadata.name;

        for (rule_index, rule) in self.policy.spec.rules.iter().enumerate() {
            let id = format!("{policy_name}.{}", rule.name);
            let outcome = match evaluate_rule(rule, &payload) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(rule = %id, error = %e, "skipping rule that failed to evaluate");
                    continue;
                }
            };

            match outcome {
                RuleOutcome::NotApplicable => debug!(rule = %id, "rule not applicable"),
                RuleOutcome::Pass => {
                    if self.counts(&id) {
                        result.pass();
                    }
                }
                RuleOutcome::Fail(message) => {
                    if self.counts(&id) {
                        result.fail();
                    }
                    if self.observes(&id) {
                        result.observe(format!("{id}.{POLICY_INDEX}.{rule_index}"), message);
                    }
                }
            }
        }

        debug!(passing = result.passing, failing = result.failing, "assertions evaluated");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn spec(yaml: &str) -> KyvernoSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_filter_naming_unknown_rule_is_rejected() {
        let s = spec(
            r#"
policy:
  metadata: {name: labels}
  spec:
    rules:
      - name: foo
        assert:
          all:
            - check: {a: 1}
output:
  validations: [labels.bar]
"#,
        );
        let err = KyvernoProvider::new(s).unwrap_err();
        assert!(matches!(
            err,
            SpecValidationError::InvalidField { field: "output.validations", .. }
        ));
    }

    #[test]
    fn test_rule_without_assertions_is_rejected() {
        let s = spec("policy:\n  metadata: {name: p}\n  spec:\n    rules:\n      - name: r\n");
        assert!(KyvernoProvider::new(s).is_err());
    }

    #[test]
    fn test_any_assertion_passes_when_one_matches() {
        let rule: PolicyRule = serde_yaml::from_str(
            r#"
name: r
assert:
  any:
    - check: {mode: strict}
      message: not strict
    - check: {mode: audit}
"#,
        )
        .unwrap();
        assert_eq!(
            evaluate_rule(&rule, &json!({"mode": "audit"})).unwrap(),
            RuleOutcome::Pass
        );
        assert_eq!(
            evaluate_rule(&rule, &json!({"mode": "off"})).unwrap(),
            RuleOutcome::Fail("not strict".to_string())
        );
    }

    #[test]
    fn test_match_and_exclude_gate_applicability() {
        let rule: PolicyRule = serde_yaml::from_str(
            r#"
name: r
match:
  any:
    - {kind: Deployment}
exclude:
  all:
    - {metadata: {name: "kube-*"}}
assert:
  all:
    - check: {spec: {replicas: 3}}
"#,
        )
        .unwrap();
        let svc = json!({"kind": "Service", "metadata": {"name": "web"}});
        assert_eq!(evaluate_rule(&rule, &svc).unwrap(), RuleOutcome::NotApplicable);

        let system = json!({"kind": "Deployment", "metadata": {"name": "kube-dns"}});
        assert_eq!(evaluate_rule(&rule, &system).unwrap(), RuleOutcome::NotApplicable);

        let web = json!({
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 3}
        });
        assert_eq!(evaluate_rule(&rule, &web).unwrap(), RuleOutcome::Pass);
    }

    #[traced_test]
    #[test]
    fn test_erroring_rule_is_skipped_not_counted() {
        let provider = KyvernoProvider::new(spec(
            r#"
policy:
  metadata: {name: pods}
  spec:
    rules:
      - name: broken
        assert:
          all:
            - check:
                ~.pods: {}
      - name: present
        assert:
          all:
            - check:
                pods: {name: web}
"#,
        ))
        .unwrap();
        let resources = json!({"pods": {"name": "web"}}).as_object().unwrap().clone();
        let result = provider.evaluate(&resources).unwrap();

        assert_eq!((result.passing, result.failing), (1, 0));
        assert!(result.observations.is_empty());
        assert!(logs_contain("skipping rule that failed to evaluate"));
    }
}
