//! End-to-end provider scenarios over realistic resource maps.

use cairn_model::{Provider, Resources, SatisfactionState};
use cairn_providers::{build_provider, ProviderConfig};
use serde_json::{json, Value};

fn provider(yaml: &str) -> cairn_providers::ProviderKind {
    let config: ProviderConfig = serde_yaml::from_str(yaml).unwrap();
    build_provider(&config).unwrap()
}

fn resources(value: Value) -> Resources {
    value.as_object().unwrap().clone()
}

fn two_pods() -> Resources {
    resources(json!({
        "podsvt": [
            {"metadata": {"name": "labelled", "labels": {"foo": "bar"}}},
            {"metadata": {"name": "bare", "labels": {"app": "web"}}}
        ]
    }))
}

const PER_POD_REGO: &str = r#"
type: opa
opa-spec:
  rego: |
    package validate
    import rego.v1

    results[name] := true if {
      some pod in input.podsvt
      pod.metadata.labels.foo == "bar"
      name := pod.metadata.name
    }

    results[name] := false if {
      some pod in input.podsvt
      not pod.metadata.labels.foo == "bar"
      name := pod.metadata.name
    }

    validate := [v | some _, v in results]
"#;

#[test]
fn test_rego_counts_one_outcome_per_pod() {
    let result = provider(PER_POD_REGO).evaluate(&two_pods()).unwrap();
    assert_eq!(result.passing, 1);
    assert_eq!(result.failing, 1);
    assert_eq!(result.state(), SatisfactionState::NotSatisfied);
}

#[test]
fn test_same_resources_yield_identical_results() {
    let p = provider(PER_POD_REGO);
    let first = p.evaluate(&two_pods()).unwrap();
    let second = p.evaluate(&two_pods()).unwrap();
    assert_eq!(first, second);

    let k = provider(TWO_RULES);
    assert_eq!(k.evaluate(&two_pods()).unwrap(), k.evaluate(&two_pods()).unwrap());
}

const TWO_RULES: &str = r#"
type: kyverno
kyverno-spec:
  policy:
    apiVersion: json.kyverno.io/v1alpha1
    kind: ValidatingPolicy
    metadata:
      name: pod-labels
    spec:
      rules:
        - name: foo-label
          assert:
            all:
              - check:
                  ~.podsvt:
                    metadata:
                      labels:
                        foo: bar
                message: every pod needs foo=bar
        - name: team-label
          assert:
            all:
              - check:
                  ~.podsvt:
                    metadata:
                      labels:
                        team: "?*"
                message: every pod needs a team
"#;

#[test]
fn test_unfiltered_assertions_count_every_rule() {
    let result = provider(TWO_RULES).evaluate(&two_pods()).unwrap();
    assert_eq!(result.total(), 2);
    assert_eq!(result.failing, 2);
    assert_eq!(result.observations.len(), 2);
    assert_eq!(
        result.observations["pod-labels.foo-label.0.0"],
        "every pod needs foo=bar"
    );
    assert_eq!(
        result.observations["pod-labels.team-label.0.1"],
        "every pod needs a team"
    );
}

#[test]
fn test_observation_filter_emits_exactly_one_observation() {
    let yaml = format!("{TWO_RULES}  output:\n    observations:\n      - pod-labels.team-label\n");
    let result = provider(&yaml).evaluate(&two_pods()).unwrap();

    // Both rules still count: the validation filter is empty.
    assert_eq!(result.failing, 2);
    assert_eq!(result.observations.len(), 1);
    assert!(result.observations.contains_key("pod-labels.team-label.0.1"));
}

#[test]
fn test_validation_filter_limits_counted_rules() {
    let yaml = format!("{TWO_RULES}  output:\n    validations:\n      - pod-labels.foo-label\n");
    let result = provider(&yaml).evaluate(&two_pods()).unwrap();
    assert_eq!(result.total(), 1);

    // Observation keys always name a rule that had a violation.
    for key in result.observations.keys() {
        assert!(
            key.starts_with("pod-labels.foo-label") || key.starts_with("pod-labels.team-label")
        );
    }
}

#[test]
fn test_passing_assertions() {
    let all_labelled = resources(json!({
        "podsvt": [
            {"metadata": {"labels": {"foo": "bar", "team": "core"}}},
            {"metadata": {"labels": {"foo": "bar", "team": "edge"}}}
        ]
    }));
    let result = provider(TWO_RULES).evaluate(&all_labelled).unwrap();
    assert_eq!((result.passing, result.failing), (2, 0));
    assert!(result.observations.is_empty());
    assert!(result.state().is_satisfied());
}

#[test]
fn test_empty_resources_short_circuit_for_both_providers() {
    for yaml in [PER_POD_REGO, TWO_RULES] {
        let result = provider(yaml).evaluate(&Resources::new()).unwrap();
        assert_eq!(result.total(), 0);
    }
}
