//! Cairn-Model: shared vocabulary for the cairn validation engine
//!
//! This crate defines the types every other cairn crate speaks: the collected
//! resource tree, the evaluation result, and the capability traits that
//! resource collectors (domains) and policy evaluators (providers) implement.
//!
//! ## Layer 0 - Vocabulary
//!
//! Focus: small, dependency-light types with strict invariants.
//!
//! ## Key Components
//!
//! - `Resources`: the semi-structured document tree handed from a domain to a provider
//! - `ValidationResult`: passing/failing counts plus observations
//! - `Domain` / `Provider`: capability traits implemented by the variant crates
//! - `cancellable`: races a future against a `CancellationToken`

pub mod cancel;
mod error;
pub mod resources;
pub mod result;
pub mod traits;

pub use cancel::cancellable;
pub use error::{CollectionError, EvaluationError, SpecValidationError};
pub use resources::{lookup_path, Resources};
pub use result::{SatisfactionState, ValidationResult};
pub use traits::{Domain, Provider};

pub use tokio_util::sync::CancellationToken;

/// Result type for spec validation.
pub type SpecResult<T> = std::result::Result<T, SpecValidationError>;

/// Result type for resource collection.
pub type CollectionResult<T> = std::result::Result<T, CollectionError>;

/// Result type for policy evaluation.
pub type EvaluationResult<T> = std::result::Result<T, EvaluationError>;
