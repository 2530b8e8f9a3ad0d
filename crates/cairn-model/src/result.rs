//! Evaluation outcome of a single validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Satisfaction state of a requirement or validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SatisfactionState {
    Satisfied,
    NotSatisfied,
}

impl SatisfactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SatisfactionState::Satisfied => "satisfied",
            SatisfactionState::NotSatisfied => "not-satisfied",
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, SatisfactionState::Satisfied)
    }
}

impl std::fmt::Display for SatisfactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one validation.
///
/// # Invariants
///
/// `passing + failing` equals the number of in-scope outcomes the provider
/// evaluated. Observation keys are unique composite identifiers chosen by the
/// provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passing: u32,
    pub failing: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub observations: BTreeMap<String, String>,
}

impl ValidationResult {
    /// A result with nothing evaluated.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Count one passing outcome.
    pub fn pass(&mut self) {
        self.passing += 1;
    }

    /// Count one failing outcome.
    pub fn fail(&mut self) {
        self.failing += 1;
    }

    /// Record an observation. Later writes to the same key win.
    pub fn observe(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.observations.insert(key.into(), message.into());
    }

    /// Total outcomes counted.
    pub fn total(&self) -> u32 {
        self.passing + self.failing
    }

    /// A validation passes when at least one outcome was counted and none failed.
    pub fn state(&self) -> SatisfactionState {
        if self.failing == 0 && self.passing > 0 {
            SatisfactionState::Satisfied
        } else {
            SatisfactionState::NotSatisfied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_is_not_satisfied() {
        assert_eq!(ValidationResult::empty().state(), SatisfactionState::NotSatisfied);
    }

    #[test]
    fn test_counts_and_state() {
        let mut r = ValidationResult::empty();
        r.pass();
        r.pass();
        assert_eq!(r.total(), 2);
        assert!(r.state().is_satisfied());
        r.fail();
        assert_eq!(r.state(), SatisfactionState::NotSatisfied);
    }

    #[test]
    fn test_state_serializes_kebab_case() {
        let json = serde_json::to_string(&SatisfactionState::NotSatisfied).unwrap();
        assert_eq!(json, "\"not-satisfied\"");
    }
}
