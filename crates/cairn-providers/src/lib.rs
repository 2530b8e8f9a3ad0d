//! Cairn-Providers: policy evaluators
//!
//! A provider turns a collected [`Resources`] map into a
//! [`ValidationResult`]. Two variants exist:
//!
//! - `opa`: Rego policies evaluated with `regorus`
//! - `kyverno`: assertion policies matched structurally against the resources
//!
//! ## Layer 1 - Evaluation
//!
//! Providers are pure: the same resources always produce the same result.
//! An empty resource map short-circuits to a zero result.

pub mod kyverno;
pub mod opa;

use serde::{Deserialize, Serialize};

use cairn_model::{
    EvaluationResult, Provider, Resources, SpecResult, SpecValidationError, ValidationResult,
};

pub use kyverno::{KyvernoProvider, KyvernoSpec};
pub use opa::{OpaProvider, OpaSpec};

/// Serialized form of a validation's `provider` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opa_spec: Option<OpaSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kyverno_spec: Option<KyvernoSpec>,
}

/// A constructed, validated provider.
#[derive(Debug)]
pub enum ProviderKind {
    Opa(OpaProvider),
    Kyverno(KyvernoProvider),
}

/// Build a provider from its configuration.
pub fn build_provider(config: &ProviderConfig) -> SpecResult<ProviderKind> {
    let missing = |kind: &str, field: &'static str| SpecValidationError::MissingSpec {
        category: "provider",
        kind: kind.to_string(),
        field,
    };
    match config.kind.as_str() {
        "opa" => {
            let spec = config.opa_spec.clone().ok_or_else(|| missing("opa", "opa-spec"))?;
            Ok(ProviderKind::Opa(OpaProvider::new(spec)?))
        }
        "kyverno" => {
            let spec = config
                .kyverno_spec
                .clone()
                .ok_or_else(|| missing("kyverno", "kyverno-spec"))?;
            Ok(ProviderKind::Kyverno(KyvernoProvider::new(spec)?))
        }
        other => Err(SpecValidationError::UnknownType {
            category: "provider",
            kind: other.to_string(),
        }),
    }
}

impl Provider for ProviderKind {
    fn kind(&self) -> &'static str {
        match self {
            ProviderKind::Opa(p) => p.kind(),
            ProviderKind::Kyverno(p) => p.kind(),
        }
    }

    fn evaluate(&self, resources: &Resources) -> EvaluationResult<ValidationResult> {
        match self {
            ProviderKind::Opa(p) => p.evaluate(resources),
            ProviderKind::Kyverno(p) => p.evaluate(resources),
        }
    }
}
