//! Error types for resolution, execution, configuration and store runs

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use cairn_model::{CollectionError, EvaluationError, SpecValidationError};

/// Errors raised while turning a link into a runnable validation.
///
/// Fatal for the owning requirement only; the run continues.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// The link has no usable form
    #[error("malformed validation link '{link}': {reason}")]
    MalformedLink { link: String, reason: String },

    /// A local validation file could not be read
    #[error("failed to read validation {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A remote validation could not be fetched
    #[error("failed to fetch validation {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// A remote validation answered with a non-2xx status
    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The remote fetch did not finish in time
    #[error("timed out after {timeout:?} fetching {url}")]
    TimedOut { url: String, timeout: Duration },

    /// No back-matter resource carries the referenced UUID
    #[error("embedded validation {0} not found in back-matter")]
    EmbeddedNotFound(String),

    /// The checksum suffix length selects no known digest
    #[error("unsupported checksum algorithm for a {length}-character digest")]
    UnsupportedAlgorithm { length: usize },

    /// The content does not hash to the pinned checksum
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The rendered document is not a validation
    #[error("failed to parse validation {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// The domain or provider configuration is unusable
    #[error(transparent)]
    Spec(#[from] SpecValidationError),

    /// The run was cancelled while resolving
    #[error("resolution cancelled")]
    Cancelled,
}

/// Why a resolved validation produced no result.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("collection failed: {0}")]
    Collection(#[from] CollectionError),

    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
}

/// Errors loading or overriding configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: String, reason: String },

    /// An environment override holds an unusable value
    #[error("invalid value for {key}: {reason}")]
    InvalidEnv { key: String, reason: String },

    /// A `key=value` override is malformed
    #[error("invalid override '{0}': expected var.<key>=<value> or const.<path>=<value>")]
    InvalidOverride(String),
}

/// Failures that prevent a run from evaluating anything.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The component definition holds no implemented requirements
    #[error("no control implementations with implemented requirements found")]
    NoControlImplementations,

    /// Cancelled before the run started
    #[error("run cancelled before start")]
    Cancelled,
}
