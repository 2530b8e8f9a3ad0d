//! Structured lifecycle events for validation runs.
//!
//! Events are emitted at `info!` (failures at `warn!`) with an `event`
//! field naming them, so log pipelines can filter on it.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped span for the duration of a run.
///
/// ```ignore
/// let _span = RunSpan::enter("4b0c...");
/// // every event below carries run_id
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The span every event of a run is recorded under. Async code attaches it
/// with `Instrument`; synchronous sections use [`RunSpan`].
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("cairn.run", run_id = %run_id)
}

pub fn emit_validation_started(identity: &str, domain: &str, provider: &str) {
    info!(
        event = "validation.started",
        identity = %identity,
        domain = %domain,
        provider = %provider,
    );
}

pub fn emit_validation_finished(identity: &str, passing: u32, failing: u32, satisfied: bool) {
    info!(
        event = "validation.finished",
        identity = %identity,
        passing = passing,
        failing = failing,
        satisfied = satisfied,
    );
}

/// A validation produced no result.
pub fn emit_validation_failed(identity: &str, error: &dyn std::fmt::Display) {
    warn!(event = "validation.failed", identity = %identity, error = %error);
}

pub fn emit_requirement_evaluated(requirement_uuid: &str, control_id: &str, status: &str) {
    info!(
        event = "requirement.evaluated",
        requirement = %requirement_uuid,
        control_id = %control_id,
        status = %status,
    );
}

pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    requirements: usize,
    satisfied: usize,
    validations: usize,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        requirements = requirements,
        satisfied = satisfied,
        validations = validations,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
    }

    #[traced_test]
    #[test]
    fn test_events_carry_names() {
        emit_validation_started("v.yaml", "api", "opa");
        emit_validation_finished("v.yaml", 1, 0, true);
        emit_requirement_evaluated("req-1", "ac-1", "satisfied");
        assert!(logs_contain("validation.started"));
        assert!(logs_contain("validation.finished"));
        assert!(logs_contain("requirement.evaluated"));
    }
}
