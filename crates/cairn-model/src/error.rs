//! Error types for resource collection and policy evaluation

use std::time::Duration;

use thiserror::Error;

/// Errors raised while validating a domain or provider configuration.
///
/// Fatal for the validation being built; the run continues.
#[derive(Error, Debug)]
pub enum SpecValidationError {
    /// The `type` discriminator names no known variant
    #[error("unknown {category} type: {kind}")]
    UnknownType { category: &'static str, kind: String },

    /// The variant-specific block is absent
    #[error("{kind} {category} is missing its {field} block")]
    MissingSpec {
        category: &'static str,
        kind: String,
        field: &'static str,
    },

    /// A list that must hold at least one entry is empty
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// A required field is missing or blank
    #[error("{item} is missing required field '{field}'")]
    MissingField { item: String, field: &'static str },

    /// A field holds a value that cannot be used
    #[error("invalid {field} for {item}: {reason}")]
    InvalidField {
        item: String,
        field: &'static str,
        reason: String,
    },

    /// The running engine does not satisfy the document's version constraint
    #[error("engine version {running} does not satisfy {required}")]
    UnsupportedVersion { running: String, required: String },
}

/// Errors raised while a domain collects resources.
///
/// Any of these is fatal for the validation being collected and never for
/// its siblings.
#[derive(Error, Debug)]
pub enum CollectionError {
    /// The cluster or remote API refused or failed a request
    #[error("request to {target} failed: {reason}")]
    Request { target: String, reason: String },

    /// A non-2xx HTTP status came back
    #[error("{target} returned HTTP {status}")]
    HttpStatus { target: String, status: u16 },

    /// The response body could not be decoded
    #[error("could not decode response from {target}: {reason}")]
    Decode { target: String, reason: String },

    /// A named resource did not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// A resource rule is internally inconsistent
    #[error("invalid resource rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    /// Field extraction failed to locate or parse the requested path
    #[error("field extraction failed for '{path}': {reason}")]
    FieldExtraction { path: String, reason: String },

    /// The wait target did not become ready in time
    #[error("timed out after {timeout:?} waiting for {target}")]
    WaitTimeout { target: String, timeout: Duration },

    /// Ephemeral resources could not be created
    #[error("failed to create resource {name}: {reason}")]
    CreateFailed { name: String, reason: String },

    /// The domain performs side effects and the run did not confirm execution
    #[error("domain is executable and execution was not confirmed")]
    ExecutionNotConfirmed,

    /// The run was cancelled
    #[error("collection cancelled")]
    Cancelled,

    /// Cluster or client configuration is unusable
    #[error("client configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a provider while evaluating collected resources.
#[derive(Error, Debug)]
pub enum EvaluationError {
    /// The policy source failed to load
    #[error("policy failed to load: {0}")]
    PolicyLoad(String),

    /// The policy engine failed while evaluating
    #[error("policy engine error: {0}")]
    Engine(String),

    /// The validation output had a shape the provider cannot count
    #[error("unexpected output for '{path}': {found}")]
    UnexpectedOutput { path: String, found: String },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
