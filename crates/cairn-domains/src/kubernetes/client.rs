//! The cluster boundary.
//!
//! Everything the Kubernetes domain needs from a cluster goes through
//! [`ClusterClient`], so collection logic can run against the REST client or
//! the in-memory fake alike.

use async_trait::async_trait;
use serde_json::Value;

use cairn_model::CollectionResult;

/// Identifies a resource collection, e.g. `apps/v1 deployments`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.trim().to_string(),
            version: version.trim().to_string(),
            resource: resource.trim().to_lowercase(),
        }
    }

    /// `v1` for the core group, `group/version` otherwise.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// REST path of the group-version root.
    pub fn group_version_path(&self) -> String {
        api_root(&self.api_version())
    }

    /// REST path of the collection, scoped to `namespace` when given.
    pub fn collection_path(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!(
                "{}/namespaces/{}/{}",
                self.group_version_path(),
                ns,
                self.resource
            ),
            None => format!("{}/{}", self.group_version_path(), self.resource),
        }
    }
}

impl std::fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// REST root for an `apiVersion` string.
pub fn api_root(api_version: &str) -> String {
    if api_version.contains('/') {
        format!("/apis/{api_version}")
    } else {
        format!("/api/{api_version}")
    }
}

/// Discovery information for a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResource {
    pub gvr: GroupVersionResource,
    pub kind: String,
    pub namespaced: bool,
}

impl ApiResource {
    /// Build from an `apiVersion` string plus discovery fields.
    pub fn new(api_version: &str, kind: &str, resource: &str, namespaced: bool) -> Self {
        let (group, version) = api_version.rsplit_once('/').unwrap_or(("", api_version));
        Self {
            gvr: GroupVersionResource::new(group, version, resource),
            kind: kind.to_string(),
            namespaced,
        }
    }
}

/// Operations the Kubernetes domain performs against a cluster.
///
/// Every call is a single round trip; callers wrap them in
/// [`cairn_model::cancellable`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List a collection. `namespace: None` lists across all namespaces (or the
    /// cluster scope for cluster-scoped resources).
    async fn list(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> CollectionResult<Vec<Value>>;

    /// Fetch one object. A missing object is `Ok(None)`.
    async fn get(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
    ) -> CollectionResult<Option<Value>>;

    /// Server-side apply `object` and return the stored form. The namespace is
    /// taken from `metadata.namespace`.
    async fn apply(&self, resource: &ApiResource, object: &Value) -> CollectionResult<Value>;

    /// Delete one object. Deleting a missing object succeeds.
    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> CollectionResult<()>;

    /// Map an `apiVersion` and `kind` to the resource that serves it.
    async fn resolve_kind(&self, api_version: &str, kind: &str) -> CollectionResult<ApiResource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_group_paths() {
        let gvr = GroupVersionResource::new("", "v1", "Pods");
        assert_eq!(gvr.api_version(), "v1");
        assert_eq!(gvr.collection_path(None), "/api/v1/pods");
        assert_eq!(
            gvr.collection_path(Some("kube-system")),
            "/api/v1/namespaces/kube-system/pods"
        );
    }

    #[test]
    fn test_named_group_paths() {
        let gvr = GroupVersionResource::new("apps", "v1", "deployments");
        assert_eq!(gvr.api_version(), "apps/v1");
        assert_eq!(
            gvr.collection_path(Some("web")),
            "/apis/apps/v1/namespaces/web/deployments"
        );
        assert_eq!(gvr.to_string(), "apps/v1/deployments");
    }

    #[test]
    fn test_api_resource_splits_api_version() {
        let res = ApiResource::new("batch/v1", "Job", "jobs", true);
        assert_eq!(res.gvr.group, "batch");
        assert_eq!(res.gvr.version, "v1");
        let core = ApiResource::new("v1", "Namespace", "namespaces", false);
        assert_eq!(core.gvr.group, "");
    }
}
