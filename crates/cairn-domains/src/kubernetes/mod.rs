//! Kubernetes domain
//!
//! Collection runs in three phases, each aborting the whole collection on
//! error:
//!
//! 1. apply `create-resources` (only for executable domains)
//! 2. `wait` until the target is ready or the timeout expires
//! 3. evaluate each resource rule in order
//!
//! Objects applied in phase 1 are deleted by [`Domain::teardown`].

mod client;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
mod field;
mod rest;
mod spec;
mod wait;

pub use client::{api_root, ApiResource, ClusterClient, GroupVersionResource};
pub use field::{extract_field, strip_managed_fields};
pub use rest::{ClusterConfig, RestClusterClient, FIELD_MANAGER};
pub use spec::{
    CreateResource, Field, FieldType, KubernetesSpec, ResourceEntry, ResourceRule, WaitSpec,
    DEFAULT_WAIT_TIMEOUT,
};
pub use wait::{is_ready, WAIT_POLL_INTERVAL};

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use cairn_model::{
    cancellable, CancellationToken, CollectionError, CollectionResult, Domain, Resources,
    SpecResult,
};

use spec::PreparedCreate;

pub(crate) fn object_name(object: &Value) -> Option<&str> {
    object["metadata"]["name"].as_str()
}

pub(crate) fn object_namespace(object: &Value) -> Option<&str> {
    object["metadata"]["namespace"].as_str()
}

#[derive(Debug)]
struct CreatedObject {
    resource: ApiResource,
    namespace: Option<String>,
    name: String,
}

/// A validated Kubernetes domain bound to a cluster.
pub struct KubernetesDomain {
    spec: KubernetesSpec,
    wait_timeout: Option<Duration>,
    creates: Vec<PreparedCreate>,
    client: Arc<dyn ClusterClient>,
    created: Mutex<Vec<CreatedObject>>,
}

impl std::fmt::Debug for KubernetesDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesDomain")
            .field("spec", &self.spec)
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

impl KubernetesDomain {
    /// Validate `spec` and load its manifests. Relative manifest files resolve
    /// against `base_dir`.
    pub fn new(
        spec: KubernetesSpec,
        client: Arc<dyn ClusterClient>,
        base_dir: &Path,
    ) -> SpecResult<Self> {
        let wait_timeout = spec.validate()?;
        let creates = spec.prepare_creates(base_dir)?;
        Ok(Self {
            spec,
            wait_timeout,
            creates,
            client,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn spec(&self) -> &KubernetesSpec {
        &self.spec
    }

    async fn create(
        &self,
        create: &PreparedCreate,
        cancel: &CancellationToken,
    ) -> CollectionResult<Vec<Value>> {
        let mut applied = Vec::with_capacity(create.objects.len());
        for template in &create.objects {
            let mut object = template.clone();
            let api_version = object["apiVersion"].as_str().unwrap_or_default().to_string();
            let kind = object["kind"].as_str().unwrap_or_default().to_string();
            let name = object_name(&object).unwrap_or_default().to_string();
            let failed = |e: CollectionError| match e {
                CollectionError::Cancelled => CollectionError::Cancelled,
                other => CollectionError::CreateFailed {
                    name: format!("{kind}/{name}"),
                    reason: other.to_string(),
                },
            };

            let resource = cancellable(cancel, self.client.resolve_kind(&api_version, &kind))
                .await
                .map_err(&failed)?;
            let namespace = if resource.namespaced {
                let ns = object_namespace(&object)
                    .map(str::to_string)
                    .or_else(|| create.namespace.clone())
                    .unwrap_or_else(|| "default".to_string());
                object["metadata"]["namespace"] = Value::String(ns.clone());
                Some(ns)
            } else {
                None
            };

            let mut stored = cancellable(cancel, self.client.apply(&resource, &object))
                .await
                .map_err(&failed)?;
            strip_managed_fields(&mut stored);
            info!(kind = %kind, name = %name, namespace = ?namespace, "created resource");

            self.created
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(CreatedObject {
                    resource,
                    namespace,
                    name: name.clone(),
                });
            applied.push(stored);
        }
        Ok(applied)
    }

    async fn wait_for(
        &self,
        wait: &WaitSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CollectionResult<()> {
        let gvr = wait.gvr();
        info!(target = %wait.target(), ?timeout, "waiting for readiness");

        let poll = async {
            loop {
                let items = self
                    .client
                    .list(&gvr, wait.namespace.as_deref(), wait.selector.as_deref())
                    .await?;
                let targets: Vec<&Value> = items
                    .iter()
                    .filter(|o| wait.name.is_none() || object_name(o) == wait.name.as_deref())
                    .collect();
                if !targets.is_empty()
                    && targets
                        .iter()
                        .all(|o| is_ready(&gvr.resource, o, wait.condition.as_deref()))
                {
                    return Ok::<(), CollectionError>(());
                }
                debug!(found = targets.len(), "wait target not ready");
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
        };

        match tokio::time::timeout(timeout, cancellable(cancel, poll)).await {
            Ok(result) => result,
            Err(_) => Err(CollectionError::WaitTimeout {
                target: wait.target(),
                timeout,
            }),
        }
    }

    async fn collect_rule(
        &self,
        entry: &str,
        rule: &ResourceRule,
        cancel: &CancellationToken,
    ) -> CollectionResult<Value> {
        let gvr = rule.gvr();
        let name = rule.name.as_deref().filter(|n| !n.trim().is_empty());
        let mut objects: Vec<Value> = match (name, rule.namespaces.as_slice()) {
            (Some(_), [_, _, ..]) => {
                return Err(CollectionError::InvalidRule {
                    rule: entry.to_string(),
                    reason: "name cannot be combined with more than one namespace".to_string(),
                })
            }
            (Some(name), [ns]) => {
                cancellable(cancel, self.client.get(&gvr, Some(ns.as_str()), name))
                    .await?
                    .into_iter()
                    .collect()
            }
            (Some(name), []) => cancellable(cancel, self.client.list(&gvr, None, None))
                .await?
                .into_iter()
                .filter(|o| object_name(o) == Some(name))
                .collect(),
            (None, []) => cancellable(cancel, self.client.list(&gvr, None, None)).await?,
            (None, namespaces) => {
                let mut all = Vec::new();
                for ns in namespaces {
                    let listed =
                        cancellable(cancel, self.client.list(&gvr, Some(ns.as_str()), None))
                            .await?;
                    all.extend(listed);
                }
                all
            }
        };
        debug!(rule = entry, %gvr, count = objects.len(), "collected objects");

        if let Some(name) = name {
            match objects.len() {
                0 => return Err(CollectionError::NotFound(format!("{gvr} {name}"))),
                1 => {}
                n => {
                    return Err(CollectionError::InvalidRule {
                        rule: entry.to_string(),
                        reason: format!("name '{name}' matched {n} objects; set a namespace"),
                    })
                }
            }
        }

        for object in &mut objects {
            strip_managed_fields(object);
        }
        let mut values = match &rule.field {
            Some(field) => objects
                .iter()
                .map(|o| extract_field(o, field))
                .collect::<CollectionResult<Vec<_>>>()?,
            None => objects,
        };

        if name.is_some() {
            Ok(values.pop().unwrap_or(Value::Null))
        } else {
            Ok(Value::Array(values))
        }
    }
}

#[async_trait]
impl Domain for KubernetesDomain {
    fn kind(&self) -> &'static str {
        "kubernetes"
    }

    fn is_executable(&self) -> bool {
        !self.creates.is_empty()
    }

    #[instrument(skip_all, fields(rules = self.spec.resources.len(), creates = self.creates.len()))]
    async fn get_resources(&self, cancel: &CancellationToken) -> CollectionResult<Resources> {
        let mut resources = Resources::new();

        for create in &self.creates {
            let applied = self.create(create, cancel).await?;
            resources.insert(create.name.clone(), Value::Array(applied));
        }

        if let (Some(wait), Some(timeout)) = (&self.spec.wait, self.wait_timeout) {
            self.wait_for(wait, timeout, cancel).await?;
        }

        for entry in &self.spec.resources {
            let value = self
                .collect_rule(&entry.name, &entry.resource_rule, cancel)
                .await?;
            resources.insert(entry.name.clone(), value);
        }
        Ok(resources)
    }

    async fn teardown(&self) {
        let created = std::mem::take(
            &mut *self
                .created
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for object in created.into_iter().rev() {
            match self
                .client
                .delete(&object.resource, object.namespace.as_deref(), &object.name)
                .await
            {
                Ok(()) => {
                    debug!(kind = %object.resource.kind, name = %object.name, "deleted resource")
                }
                Err(e) => warn!(
                    event = "teardown.failed",
                    kind = %object.resource.kind,
                    name = %object.name,
                    error = %e,
                    "failed to delete created resource"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::MemoryClusterClient;
    use serde_json::json;

    fn pods() -> GroupVersionResource {
        GroupVersionResource::new("", "v1", "pods")
    }

    fn domain(client: &Arc<MemoryClusterClient>, yaml: &str) -> KubernetesDomain {
        let spec: KubernetesSpec = serde_yaml::from_str(yaml).unwrap();
        KubernetesDomain::new(spec, client.clone(), Path::new(".")).unwrap()
    }

    #[tokio::test]
    async fn test_name_with_many_namespaces_is_invalid_rule() {
        let client = Arc::new(MemoryClusterClient::new());
        let d = domain(
            &client,
            r#"
resources:
  - name: web
    resource-rule:
      name: web
      version: v1
      resource: pods
      namespaces: [a, b]
"#,
        );
        let err = d.get_resources(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CollectionError::InvalidRule { .. }));
    }

    #[tokio::test]
    async fn test_named_rule_yields_scalar_without_managed_fields() {
        let client = Arc::new(MemoryClusterClient::new());
        client.insert(
            &pods(),
            json!({"metadata": {"name": "web", "namespace": "a", "managedFields": []}}),
        );
        let d = domain(
            &client,
            r#"
resources:
  - name: web
    resource-rule:
      name: web
      version: v1
      resource: pods
      namespaces: [a]
"#,
        );
        let res = d.get_resources(&CancellationToken::new()).await.unwrap();
        assert!(res["web"].is_object());
        assert!(res["web"]["metadata"].get("managedFields").is_none());
    }

    #[tokio::test]
    async fn test_named_rule_not_found() {
        let client = Arc::new(MemoryClusterClient::new());
        let d = domain(
            &client,
            r#"
resources:
  - name: web
    resource-rule:
      name: web
      version: v1
      resource: pods
"#,
        );
        let err = d.get_resources(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CollectionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_not_executable_without_creates() {
        let client = Arc::new(MemoryClusterClient::new());
        let d = domain(
            &client,
            r#"
resources:
  - name: all
    resource-rule:
      version: v1
      resource: pods
"#,
        );
        assert!(!d.is_executable());
        assert_eq!(d.kind(), "kubernetes");
    }
}
