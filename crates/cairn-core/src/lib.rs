//! Cairn-Core: resolve, run and aggregate validations
//!
//! Ties the collectors and evaluators together: validation references found
//! on OSCAL implemented requirements are resolved (local, remote or embedded,
//! optionally checksum-pinned), rendered, built into a domain/provider pair,
//! executed and reduced into one satisfaction state per requirement.
//!
//! ## Layer 2 - Orchestration
//!
//! ## Key Components
//!
//! - [`Resolver`]: turns a link into a ready-to-run [`Validation`]
//! - [`run_validation`]: collect, tear down, evaluate
//! - [`RequirementStore`]: indexes requirements and runs their validations on a bounded pool
//! - [`assessment_results`]: OSCAL assessment results for a finished run
//! - [`CairnConfig`] / [`TemplateRenderer`]: constants, variables and placeholder rendering

pub mod assessment;
pub mod checksum;
pub mod config;
mod error;
pub mod obs;
pub mod resolver;
pub mod runner;
pub mod store;
pub mod telemetry;
pub mod template;
pub mod validation;

pub use assessment::assessment_results;
pub use checksum::Algorithm;
pub use config::CairnConfig;
pub use error::{ConfigError, ExecutionError, ResolutionError, StoreError};
pub use resolver::{Reference, ResolveContext, ResolvedValidation, Resolver};
pub use runner::run_validation;
pub use store::{
    new_run_id, Aggregation, ProgressReporter, RemarksTarget, Requirement, RequirementOutcome,
    RequirementStore, RunReport, StoreOptions, TracingReporter, ValidationRecord,
};
pub use telemetry::init_tracing;
pub use template::{RenderMode, TemplateRenderer, Variable};
pub use validation::{Validation, ValidationDocument, ENGINE_VERSION};

/// Result type for validation resolution.
pub type ResolutionResult<T> = std::result::Result<T, ResolutionError>;

/// Result type for requirement store runs.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
