//! Cairn-Domains: resource collectors
//!
//! A domain gathers the evidence a policy is evaluated against. Two variants
//! exist:
//!
//! - `kubernetes`: lists cluster objects, optionally creating ephemeral
//!   resources and waiting for readiness first
//! - `api`: issues HTTP requests and records status plus decoded body
//!
//! ## Layer 1 - Collection
//!
//! The variant set is closed: [`DomainKind`] is built from a
//! [`DomainConfig`] by [`build_domain`], which rejects unknown
//! discriminators with a typed error.

pub mod api;
mod duration;
pub mod kubernetes;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cairn_model::{
    CancellationToken, CollectionResult, Domain, Resources, SpecResult, SpecValidationError,
};

pub use api::{ApiDomain, ApiSpec};
pub use duration::parse_duration;
pub use kubernetes::{ClusterClient, KubernetesDomain, KubernetesSpec};

/// Serialized form of a validation's `domain` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DomainConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_spec: Option<KubernetesSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_spec: Option<ApiSpec>,
}

/// What a domain needs from its surroundings at construction time.
#[derive(Clone, Default)]
pub struct DomainContext {
    /// Directory that relative manifest paths are resolved against
    pub base_dir: PathBuf,
    /// Cluster connection; inferred from the environment when absent
    pub cluster: Option<Arc<dyn ClusterClient>>,
}

impl DomainContext {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cluster: None,
        }
    }

    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }
}

/// A constructed, validated domain.
pub enum DomainKind {
    Kubernetes(KubernetesDomain),
    Api(ApiDomain),
}

impl std::fmt::Debug for DomainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainKind")
            .field("kind", &self.kind())
            .field("executable", &self.is_executable())
            .finish()
    }
}

/// Build a domain from its configuration.
pub fn build_domain(config: &DomainConfig, ctx: &DomainContext) -> SpecResult<DomainKind> {
    match config.kind.as_str() {
        "kubernetes" => {
            let spec = config
                .kubernetes_spec
                .clone()
                .ok_or_else(|| missing_spec("kubernetes", "kubernetes-spec"))?;
            let client = match &ctx.cluster {
                Some(client) => Arc::clone(client),
                None => Arc::new(kubernetes::RestClusterClient::infer().map_err(|e| {
                    SpecValidationError::InvalidField {
                        item: "kubernetes domain".to_string(),
                        field: "cluster",
                        reason: e.to_string(),
                    }
                })?),
            };
            Ok(DomainKind::Kubernetes(KubernetesDomain::new(
                spec,
                client,
                &ctx.base_dir,
            )?))
        }
        "api" => {
            let spec = config
                .api_spec
                .clone()
                .ok_or_else(|| missing_spec("api", "api-spec"))?;
            Ok(DomainKind::Api(ApiDomain::new(spec)?))
        }
        other => Err(SpecValidationError::UnknownType {
            category: "domain",
            kind: other.to_string(),
        }),
    }
}

fn missing_spec(kind: &str, field: &'static str) -> SpecValidationError {
    SpecValidationError::MissingSpec {
        category: "domain",
        kind: kind.to_string(),
        field,
    }
}

#[async_trait]
impl Domain for DomainKind {
    fn kind(&self) -> &'static str {
        match self {
            DomainKind::Kubernetes(d) => d.kind(),
            DomainKind::Api(d) => d.kind(),
        }
    }

    fn is_executable(&self) -> bool {
        match self {
            DomainKind::Kubernetes(d) => d.is_executable(),
            DomainKind::Api(d) => d.is_executable(),
        }
    }

    async fn get_resources(&self, cancel: &CancellationToken) -> CollectionResult<Resources> {
        match self {
            DomainKind::Kubernetes(d) => d.get_resources(cancel).await,
            DomainKind::Api(d) => d.get_resources(cancel).await,
        }
    }

    async fn teardown(&self) {
        match self {
            DomainKind::Kubernetes(d) => d.teardown().await,
            DomainKind::Api(d) => d.teardown().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::fake::MemoryClusterClient;

    fn ctx() -> DomainContext {
        DomainContext::new(".").with_cluster(Arc::new(MemoryClusterClient::new()))
    }

    #[test]
    fn test_unknown_domain_type_is_rejected() {
        let config: DomainConfig = serde_yaml::from_str("type: terraform\n").unwrap();
        let err = build_domain(&config, &ctx()).unwrap_err();
        assert!(matches!(
            err,
            SpecValidationError::UnknownType { category: "domain", .. }
        ));
    }

    #[test]
    fn test_missing_variant_block_is_rejected() {
        let config: DomainConfig = serde_yaml::from_str("type: api\n").unwrap();
        let err = build_domain(&config, &ctx()).unwrap_err();
        assert!(matches!(err, SpecValidationError::MissingSpec { .. }));
    }

    #[test]
    fn test_builds_kubernetes_domain_with_injected_client() {
        let yaml = r#"
type: kubernetes
kubernetes-spec:
  resources:
    - name: pods
      resource-rule:
        version: v1
        resource: pods
"#;
        let config: DomainConfig = serde_yaml::from_str(yaml).unwrap();
        let domain = build_domain(&config, &ctx()).unwrap();
        assert_eq!(domain.kind(), "kubernetes");
        assert!(!domain.is_executable());
    }
}
