//! Execute one validation: collect, tear down, evaluate.

use tracing::instrument;

use cairn_model::{CancellationToken, CollectionError, Domain, Provider, ValidationResult};

use crate::error::ExecutionError;
use crate::obs;
use crate::validation::Validation;

/// Run `validation` to a result.
///
/// Executable domains only run when `confirm_execution` is set. Teardown
/// runs after every collection attempt, successful or not, and before
/// evaluation.
#[instrument(skip_all, fields(identity = %validation.identity))]
pub async fn run_validation(
    validation: &Validation,
    cancel: &CancellationToken,
    confirm_execution: bool,
) -> Result<ValidationResult, ExecutionError> {
    if validation.is_executable() && !confirm_execution {
        return Err(CollectionError::ExecutionNotConfirmed.into());
    }

    obs::emit_validation_started(
        &validation.identity,
        validation.domain.kind(),
        validation.provider.kind(),
    );

    let collected = validation.domain.get_resources(cancel).await;
    validation.domain.teardown().await;
    let resources = collected?;

    let result = validation.provider.evaluate(&resources)?;
    obs::emit_validation_finished(
        &validation.identity,
        result.passing,
        result.failing,
        result.state().is_satisfied(),
    );
    Ok(result)
}
