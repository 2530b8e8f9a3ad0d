//! `ValidatingPolicy` documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: PolicyMetadata,
    #[serde(default)]
    pub spec: PolicySpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matching: Option<MatchBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<MatchBlock>,
    #[serde(default)]
    pub assert: AssertBlock,
}

/// Patterns selecting which payloads a rule applies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchBlock {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<Value>,
}

impl MatchBlock {
    pub fn is_empty(&self) -> bool {
        self.any.is_empty() && self.all.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertBlock {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<Assertion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<Assertion>,
}

impl AssertBlock {
    pub fn is_empty(&self) -> bool {
        self.any.is_empty() && self.all.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub check: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
