//! Capability traits for resource collection and policy evaluation
//!
//! These traits are the seam between the orchestration layer and the
//! pluggable variants:
//! - `Domain`: collects a [`Resources`] map from a target environment
//! - `Provider`: evaluates a [`Resources`] map into a [`ValidationResult`]
//!
//! Domains are async and observe a [`CancellationToken`]; providers are pure
//! and synchronous.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::resources::Resources;
use crate::result::ValidationResult;
use crate::{CollectionResult, EvaluationResult};

/// A resource collector.
///
/// Guarantees:
/// - `get_resources` either returns the complete map or an error, never a
///   partial collection.
/// - Every blocking call inside `get_resources` returns promptly with
///   `CollectionError::Cancelled` once `cancel` fires.
/// - `teardown` is safe to call whether or not `get_resources` ran or failed.
#[async_trait]
pub trait Domain: Send + Sync {
    /// Discriminator of this variant (e.g. `"kubernetes"`).
    fn kind(&self) -> &'static str;

    /// Whether collection performs side effects that need confirmation.
    fn is_executable(&self) -> bool;

    /// Collect every configured resource.
    async fn get_resources(&self, cancel: &CancellationToken) -> CollectionResult<Resources>;

    /// Release anything `get_resources` created. Failures are logged by the
    /// implementation and never surface.
    async fn teardown(&self) {}
}

/// A policy evaluator.
///
/// Implementations must be deterministic: the same resources always yield the
/// same result.
pub trait Provider: Send + Sync {
    /// Discriminator of this variant (e.g. `"opa"`).
    fn kind(&self) -> &'static str;

    /// Evaluate the collected resources.
    fn evaluate(&self, resources: &Resources) -> EvaluationResult<ValidationResult>;
}
