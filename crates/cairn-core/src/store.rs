//! Requirement store: index requirements, run their validations, aggregate.
//!
//! Per requirement: `Unresolved -> Resolved -> Evaluated -> Satisfied | NotSatisfied`.
//! Every distinct validation (same target and checksum) is resolved and
//! executed once per run on a semaphore-bounded pool, however many
//! requirements link it. Resolution and execution failures only affect the
//! requirements that link the failing validation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use cairn_model::{CancellationToken, SatisfactionState, ValidationResult};
use cairn_oscal::{ComponentDefinition, ImplementedRequirement};

use crate::error::StoreError;
use crate::obs;
use crate::resolver::{Reference, ResolveContext, Resolver};
use crate::runner::run_validation;
use crate::StoreResult;

pub const DEFAULT_MAX_CONCURRENCY: usize = crate::config::DEFAULT_MAX_CONCURRENCY;

/// How several validations on one requirement combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    /// Satisfied when at least one validation passed
    #[default]
    Any,
    /// Satisfied when every validation passed
    All,
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Aggregation::Any),
            "all" => Ok(Aggregation::All),
            other => Err(format!("unknown aggregation: {other} (expected any or all)")),
        }
    }
}

/// Where generated remarks are written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemarksTarget {
    Statement,
    #[default]
    Requirement,
    Both,
}

impl FromStr for RemarksTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "statement" => Ok(RemarksTarget::Statement),
            "requirement" => Ok(RemarksTarget::Requirement),
            "both" => Ok(RemarksTarget::Both),
            other => Err(format!(
                "unknown remarks target: {other} (expected statement, requirement or both)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub aggregation: Aggregation,
    pub remarks_target: RemarksTarget,
    pub max_concurrency: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            aggregation: Aggregation::default(),
            remarks_target: RemarksTarget::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// An implemented requirement as the store sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub uuid: String,
    pub control_id: String,
    pub description: String,
    /// `rel: lula` link targets, in document order
    pub links: Vec<String>,
}

impl Requirement {
    pub fn from_implemented(req: &ImplementedRequirement) -> Self {
        Self {
            uuid: req.uuid.clone(),
            control_id: req.control_id.clone(),
            description: req.description.clone(),
            links: req.validation_links().map(|l| l.href.clone()).collect(),
        }
    }
}

/// Outcome of one distinct validation within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub identity: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ValidationResult>,
    /// Why no result was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationRecord {
    fn failed(
        identity: impl Into<String>,
        link: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            link: link.into(),
            name: String::new(),
            uuid: None,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn state(&self) -> SatisfactionState {
        self.result
            .as_ref()
            .map(ValidationResult::state)
            .unwrap_or(SatisfactionState::NotSatisfied)
    }

    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.identity
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequirementOutcome {
    pub control_id: String,
    pub status: SatisfactionState,
    pub results: Vec<ValidationRecord>,
    pub remarks: String,
}

/// Everything a finished run determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunReport {
    pub run_id: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    /// Keyed by requirement UUID
    pub requirements: BTreeMap<String, RequirementOutcome>,
}

impl RunReport {
    pub fn all_satisfied(&self) -> bool {
        self.requirements
            .values()
            .all(|o| o.status.is_satisfied())
    }

    pub fn satisfied_count(&self) -> usize {
        self.requirements
            .values()
            .filter(|o| o.status.is_satisfied())
            .count()
    }

    /// Process exit status: non-zero iff any requirement is not satisfied.
    pub fn exit_status(&self) -> i32 {
        if self.all_satisfied() {
            0
        } else {
            1
        }
    }

    /// Distinct validation records, first occurrence wins.
    pub fn validations(&self) -> Vec<&ValidationRecord> {
        let mut seen = HashSet::new();
        self.requirements
            .values()
            .flat_map(|o| o.results.iter())
            .filter(|r| seen.insert((r.identity.as_str(), r.link.as_str())))
            .collect()
    }
}

/// Progress callbacks. Called from worker tasks.
pub trait ProgressReporter: Send + Sync {
    fn validation_started(&self, _identity: &str) {}
    fn validation_finished(&self, _record: &ValidationRecord) {}
    fn requirement_evaluated(&self, _requirement: &Requirement, _outcome: &RequirementOutcome) {}
}

/// Reports progress as lifecycle events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn validation_started(&self, identity: &str) {
        debug!(identity = %identity, "resolving validation");
    }

    fn validation_finished(&self, record: &ValidationRecord) {
        if let Some(error) = &record.error {
            obs::emit_validation_failed(&record.identity, error);
        }
    }

    fn requirement_evaluated(&self, requirement: &Requirement, outcome: &RequirementOutcome) {
        obs::emit_requirement_evaluated(
            &requirement.uuid,
            &requirement.control_id,
            outcome.status.as_str(),
        );
    }
}

pub struct RequirementStore {
    requirements: Vec<Requirement>,
    resolver: Arc<Resolver>,
    context: Arc<ResolveContext>,
    options: StoreOptions,
    reporter: Arc<dyn ProgressReporter>,
}

impl RequirementStore {
    pub fn new(
        requirements: Vec<Requirement>,
        resolver: Resolver,
        context: ResolveContext,
    ) -> Self {
        Self {
            requirements,
            resolver: Arc::new(resolver),
            context: Arc::new(context),
            options: StoreOptions::default(),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Index every implemented requirement of every control implementation.
    ///
    /// Links resolve relative to `base_dir`; embedded links against the
    /// definition's back-matter.
    pub fn from_component_definition(
        definition: &ComponentDefinition,
        resolver: Resolver,
        base_dir: impl Into<PathBuf>,
    ) -> StoreResult<Self> {
        let mut seen = HashSet::new();
        let mut requirements = Vec::new();
        let implemented = definition
            .components
            .iter()
            .flat_map(|c| c.control_implementations.iter())
            .flat_map(|ci| ci.implemented_requirements.iter());
        for req in implemented {
            if !seen.insert(req.uuid.clone()) {
                warn!(requirement = %req.uuid, "duplicate implemented requirement ignored");
                continue;
            }
            requirements.push(Requirement::from_implemented(req));
        }
        if requirements.is_empty() {
            return Err(StoreError::NoControlImplementations);
        }

        let context =
            ResolveContext::new(base_dir).with_back_matter(definition.back_matter.clone());
        Ok(Self::new(requirements, resolver, context))
    }

    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Resolve, execute and aggregate every requirement under a fresh run id.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        confirm_execution: bool,
    ) -> StoreResult<RunReport> {
        self.run_as(new_run_id(), cancel, confirm_execution).await
    }

    /// Like [`run`](Self::run) with a caller-chosen id, so events logged
    /// before and after the run share its `cairn.run` span.
    pub async fn run_as(
        &self,
        run_id: String,
        cancel: &CancellationToken,
        confirm_execution: bool,
    ) -> StoreResult<RunReport> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let span = obs::run_span(&run_id);
        self.run_inner(run_id, cancel, confirm_execution)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: String,
        cancel: &CancellationToken,
        confirm_execution: bool,
    ) -> StoreResult<RunReport> {
        let started = Utc::now();
        let clock = Instant::now();

        // Parse every link; collect distinct validations in first-seen order.
        let mut plans: Vec<Vec<Result<(String, Reference), ValidationRecord>>> = Vec::new();
        let mut distinct: Vec<(String, Reference)> = Vec::new();
        let mut queued = HashSet::new();
        for req in &self.requirements {
            let mut plan = Vec::new();
            for link in &req.links {
                match Reference::parse(link, &self.context.base_dir) {
                    Ok(reference) => {
                        let key = cache_key(&reference);
                        if queued.insert(key.clone()) {
                            distinct.push((key.clone(), reference.clone()));
                        }
                        plan.push(Ok((key, reference)));
                    }
                    Err(e) => plan.push(Err(ValidationRecord::failed(
                        link.as_str(),
                        link.as_str(),
                        format!("resolution failed: {e}"),
                    ))),
                }
            }
            plans.push(plan);
        }

        let validations = distinct.len();
        let records = self.execute(distinct, cancel, confirm_execution).await;

        let mut outcomes = BTreeMap::new();
        for (req, plan) in self.requirements.iter().zip(plans) {
            let mut results = Vec::new();
            let mut included = HashSet::new();
            for entry in plan {
                match entry {
                    Ok((key, reference)) => {
                        if !included.insert(key.clone()) {
                            continue;
                        }
                        let record = records.get(&key).cloned().unwrap_or_else(|| {
                            ValidationRecord::failed(
                                reference.identity(),
                                reference.link.as_str(),
                                "validation task did not complete",
                            )
                        });
                        results.push(record);
                    }
                    Err(record) => results.push(record),
                }
            }

            let status = aggregate(self.options.aggregation, &results);
            let outcome = RequirementOutcome {
                control_id: req.control_id.clone(),
                status,
                remarks: render_remarks(&results),
                results,
            };
            self.reporter.requirement_evaluated(req, &outcome);
            outcomes.insert(req.uuid.clone(), outcome);
        }

        let report = RunReport {
            run_id,
            started,
            finished: Utc::now(),
            requirements: outcomes,
        };
        obs::emit_run_finished(
            &report.run_id,
            clock.elapsed().as_millis() as u64,
            report.requirements.len(),
            report.satisfied_count(),
            validations,
        );
        Ok(report)
    }

    async fn execute(
        &self,
        distinct: Vec<(String, Reference)>,
        cancel: &CancellationToken,
        confirm_execution: bool,
    ) -> HashMap<String, ValidationRecord> {
        let sem = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (key, reference) in distinct {
            let sem = Arc::clone(&sem);
            let resolver = Arc::clone(&self.resolver);
            let context = Arc::clone(&self.context);
            let reporter = Arc::clone(&self.reporter);
            let cancel = cancel.clone();
            join_set.spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    reporter.validation_started(&reference.identity());
                    let record =
                        execute_one(&resolver, &reference, &context, &cancel, confirm_execution)
                            .await;
                    reporter.validation_finished(&record);
                    (key, record)
                }
                .in_current_span(),
            );
        }

        let mut records = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((key, record)) => {
                    records.insert(key, record);
                }
                Err(e) => warn!(error = %e, "validation task failed to join"),
            }
        }
        records
    }

    /// Write each outcome's remarks onto the matching implemented
    /// requirements of `definition`, at the configured target.
    pub fn annotate(&self, report: &RunReport, definition: &mut ComponentDefinition) {
        let implemented = definition
            .components
            .iter_mut()
            .flat_map(|c| c.control_implementations.iter_mut())
            .flat_map(|ci| ci.implemented_requirements.iter_mut());
        for req in implemented {
            let Some(outcome) = report.requirements.get(&req.uuid) else {
                continue;
            };
            let remarks = outcome.remarks.clone();
            let on_statements = matches!(
                self.options.remarks_target,
                RemarksTarget::Statement | RemarksTarget::Both
            ) && !req.statements.is_empty();
            let on_requirement = self.options.remarks_target != RemarksTarget::Statement
                || req.statements.is_empty();

            if on_statements {
                for statement in &mut req.statements {
                    statement.remarks = Some(remarks.clone());
                }
            }
            if on_requirement {
                req.remarks = Some(remarks);
            }
        }
    }
}

fn cache_key(reference: &Reference) -> String {
    match &reference.checksum {
        Some(sum) => format!("{}@{}", reference.identity(), sum.to_ascii_lowercase()),
        None => reference.identity(),
    }
}

async fn execute_one(
    resolver: &Resolver,
    reference: &Reference,
    context: &ResolveContext,
    cancel: &CancellationToken,
    confirm_execution: bool,
) -> ValidationRecord {
    let identity = reference.identity();
    let resolved = match resolver.resolve_reference(reference, context, cancel).await {
        Ok(resolved) => resolved,
        Err(e) => {
            return ValidationRecord::failed(
                identity,
                reference.link.as_str(),
                format!("resolution failed: {e}"),
            )
        }
    };

    let validation = &resolved.validation;
    let outcome = run_validation(validation, cancel, confirm_execution).await;
    let (result, error) = match outcome {
        Ok(result) => (Some(result), None),
        Err(e) => (None, Some(e.to_string())),
    };
    ValidationRecord {
        identity,
        link: reference.link.clone(),
        name: validation.name.clone(),
        uuid: validation.uuid.clone(),
        result,
        error,
    }
}

fn aggregate(aggregation: Aggregation, results: &[ValidationRecord]) -> SatisfactionState {
    if results.is_empty() {
        return SatisfactionState::NotSatisfied;
    }
    let satisfied = match aggregation {
        Aggregation::Any => results.iter().any(|r| r.state().is_satisfied()),
        Aggregation::All => results.iter().all(|r| r.state().is_satisfied()),
    };
    if satisfied {
        SatisfactionState::Satisfied
    } else {
        SatisfactionState::NotSatisfied
    }
}

/// A new run identifier.
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

fn render_remarks(results: &[ValidationRecord]) -> String {
    if results.is_empty() {
        return "No validation is linked to this requirement.".to_string();
    }
    let mut out = String::new();
    for record in results {
        match (&record.result, &record.error) {
            (Some(result), _) => {
                out.push_str(&format!(
                    "{}: {} (passing {}, failing {})\n",
                    record.label(),
                    result.state(),
                    result.passing,
                    result.failing
                ));
                for (key, message) in &result.observations {
                    out.push_str(&format!("  - {key}: {message}\n"));
                }
            }
            (None, error) => {
                out.push_str(&format!(
                    "{}: {} ({})\n",
                    record.label(),
                    SatisfactionState::NotSatisfied,
                    error.as_deref().unwrap_or("no result")
                ));
            }
        }
    }
    out.truncate(out.trim_end().len());
    out
}

impl fmt::Display for RequirementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.control_id, self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_domains::kubernetes::fake::MemoryClusterClient;
    use cairn_domains::kubernetes::GroupVersionResource;
    use cairn_oscal::{BackMatter, Resource};
    use serde_json::json;
    use std::time::Duration;
    use tracing_test::traced_test;

    use crate::template::TemplateRenderer;

    const POD_COUNT: &str = r#"
metadata:
  name: pods exist
domain:
  type: kubernetes
  kubernetes-spec:
    resources:
      - name: podsvt
        resource-rule:
          version: v1
          resource: pods
provider:
  type: opa
  opa-spec:
    rego: |
      package validate
      import rego.v1
      default validate := false
      validate if count(input.podsvt) > 0
"#;

    fn passed(identity: &str) -> ValidationRecord {
        let mut result = ValidationResult::empty();
        result.pass();
        ValidationRecord {
            identity: identity.to_string(),
            link: identity.to_string(),
            name: String::new(),
            uuid: None,
            result: Some(result),
            error: None,
        }
    }

    fn failed(identity: &str) -> ValidationRecord {
        let mut result = ValidationResult::empty();
        result.fail();
        result.observe("policy.rule.0.0", "label missing");
        ValidationRecord {
            result: Some(result),
            ..passed(identity)
        }
    }

    #[test]
    fn test_aggregation_any_and_all() {
        let mixed = vec![passed("a"), failed("b")];
        assert_eq!(aggregate(Aggregation::Any, &mixed), SatisfactionState::Satisfied);
        assert_eq!(aggregate(Aggregation::All, &mixed), SatisfactionState::NotSatisfied);
        assert_eq!(aggregate(Aggregation::Any, &[]), SatisfactionState::NotSatisfied);

        let errored = vec![passed("a"), ValidationRecord::failed("c", "c", "boom")];
        assert_eq!(aggregate(Aggregation::All, &errored), SatisfactionState::NotSatisfied);
    }

    #[test]
    fn test_remarks_list_results_and_observations() {
        let remarks = render_remarks(&[
            failed("v.yaml"),
            ValidationRecord::failed("w.yaml", "w.yaml", "boom"),
        ]);
        assert_eq!(
            remarks,
            "v.yaml: not-satisfied (passing 0, failing 1)\n  \
             - policy.rule.0.0: label missing\n\
             w.yaml: not-satisfied (boom)"
        );
        assert!(render_remarks(&[]).contains("No validation"));
    }

    #[test]
    fn test_parse_options() {
        assert_eq!("ALL".parse::<Aggregation>().unwrap(), Aggregation::All);
        assert_eq!("both".parse::<RemarksTarget>().unwrap(), RemarksTarget::Both);
        assert!("some".parse::<Aggregation>().is_err());
    }

    #[test]
    fn test_exit_status() {
        let mut report = RunReport {
            run_id: "r".to_string(),
            started: Utc::now(),
            finished: Utc::now(),
            requirements: BTreeMap::new(),
        };
        report.requirements.insert(
            "req-1".to_string(),
            RequirementOutcome {
                control_id: "ac-1".to_string(),
                status: SatisfactionState::Satisfied,
                results: vec![passed("a")],
                remarks: String::new(),
            },
        );
        assert_eq!(report.exit_status(), 0);
        report.requirements.insert(
            "req-2".to_string(),
            RequirementOutcome {
                control_id: "ac-2".to_string(),
                status: SatisfactionState::NotSatisfied,
                results: vec![passed("a"), failed("b")],
                remarks: String::new(),
            },
        );
        assert_eq!(report.exit_status(), 1);
        assert_eq!(report.satisfied_count(), 1);
        assert_eq!(report.validations().len(), 2);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_validation_events_carry_run_id() {
        let client = Arc::new(MemoryClusterClient::new());
        client.insert(
            &GroupVersionResource::new("", "v1", "pods"),
            json!({"metadata": {"name": "web", "namespace": "default"}}),
        );
        let resolver = Resolver::new(TemplateRenderer::default(), Duration::from_secs(5))
            .with_cluster(client);
        let context = ResolveContext::new(".").with_back_matter(Some(BackMatter {
            resources: vec![Resource {
                uuid: "5f0c".to_string(),
                description: Some(POD_COUNT.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }));
        let requirement = Requirement {
            uuid: "req-1".to_string(),
            control_id: "ac-1".to_string(),
            description: String::new(),
            links: vec!["#5f0c".to_string()],
        };
        let store = RequirementStore::new(vec![requirement], resolver, context);

        let report = store
            .run_as("run-7f3a".to_string(), &CancellationToken::new(), false)
            .await
            .unwrap();
        assert_eq!(report.run_id, "run-7f3a");
        assert!(report.all_satisfied());

        logs_assert(|lines: &[&str]| {
            for event in ["validation.started", "validation.finished", "run.finished"] {
                let line = lines
                    .iter()
                    .find(|l| l.contains(event))
                    .ok_or_else(|| format!("no {event} event"))?;
                if !line.contains("run-7f3a") {
                    return Err(format!("{event} is outside the run span: {line}"));
                }
            }
            Ok(())
        });
    }
}
