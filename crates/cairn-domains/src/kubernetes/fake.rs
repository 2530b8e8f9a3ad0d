//! In-memory cluster for tests (`test-util` feature)
//!
//! `MemoryClusterClient` stores objects per collection and namespace and
//! satisfies the [`ClusterClient`] contract without a cluster. Common core,
//! apps and batch kinds are registered up front.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use cairn_model::{CollectionError, CollectionResult};

use super::client::{ApiResource, ClusterClient, GroupVersionResource};
use super::{object_name, object_namespace};

#[derive(Debug, Clone)]
struct StoredObject {
    gvr: GroupVersionResource,
    namespace: Option<String>,
    name: String,
    object: Value,
}

#[derive(Debug)]
pub struct MemoryClusterClient {
    objects: Mutex<Vec<StoredObject>>,
    kinds: Mutex<Vec<ApiResource>>,
    rejected_kinds: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl Default for MemoryClusterClient {
    fn default() -> Self {
        let kinds = [
            ("v1", "Pod", "pods", true),
            ("v1", "ConfigMap", "configmaps", true),
            ("v1", "Secret", "secrets", true),
            ("v1", "Service", "services", true),
            ("v1", "Namespace", "namespaces", false),
            ("apps/v1", "Deployment", "deployments", true),
            ("apps/v1", "StatefulSet", "statefulsets", true),
            ("apps/v1", "DaemonSet", "daemonsets", true),
            ("apps/v1", "ReplicaSet", "replicasets", true),
            ("batch/v1", "Job", "jobs", true),
        ]
        .into_iter()
        .map(|(av, kind, res, ns)| ApiResource::new(av, kind, res, ns))
        .collect();

        Self {
            objects: Mutex::new(Vec::new()),
            kinds: Mutex::new(kinds),
            rejected_kinds: Mutex::new(HashSet::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an additional kind resolvable.
    pub fn register_kind(&self, api_version: &str, kind: &str, resource: &str, namespaced: bool) {
        lock(&self.kinds).push(ApiResource::new(api_version, kind, resource, namespaced));
    }

    /// Store `object` in the collection `gvr`. The namespace comes from
    /// `metadata.namespace`.
    pub fn insert(&self, gvr: &GroupVersionResource, object: Value) {
        let name = object_name(&object).unwrap_or_default().to_string();
        let namespace = object_namespace(&object).map(str::to_string);
        let mut objects = lock(&self.objects);
        objects.retain(|o| !(o.gvr == *gvr && o.namespace == namespace && o.name == name));
        objects.push(StoredObject {
            gvr: gvr.clone(),
            namespace,
            name,
            object,
        });
    }

    /// Mutate a stored object in place. Returns false when it does not exist.
    pub fn update<F>(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
        f: F,
    ) -> bool
    where
        F: FnOnce(&mut Value),
    {
        let mut objects = lock(&self.objects);
        match objects
            .iter_mut()
            .find(|o| o.gvr == *gvr && o.namespace.as_deref() == namespace && o.name == name)
        {
            Some(stored) => {
                f(&mut stored.object);
                true
            }
            None => false,
        }
    }

    pub fn contains(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
    ) -> bool {
        lock(&self.objects)
            .iter()
            .any(|o| o.gvr == *gvr && o.namespace.as_deref() == namespace && o.name == name)
    }

    /// Make every apply of `kind` fail, as an admission webhook would.
    pub fn reject_kind(&self, kind: &str) {
        lock(&self.rejected_kinds).insert(kind.to_string());
    }

    /// Deleted objects as `resource/namespace/name`, in deletion order.
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Equality-based label selectors: `a=b`, `a==b`, `a!=b` and bare `a`.
fn matches_selector(object: &Value, selector: &str) -> bool {
    let labels = &object["metadata"]["labels"];
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|req| {
            if let Some((key, value)) = req.split_once("!=") {
                labels[key.trim()].as_str() != Some(value.trim())
            } else if let Some((key, value)) = req.split_once('=') {
                let value = value.trim_start_matches('=').trim();
                labels[key.trim()].as_str() == Some(value)
            } else {
                !labels[req].is_null()
            }
        })
}

#[async_trait]
impl ClusterClient for MemoryClusterClient {
    async fn list(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> CollectionResult<Vec<Value>> {
        let objects = lock(&self.objects);
        Ok(objects
            .iter()
            .filter(|o| o.gvr == *gvr)
            .filter(|o| namespace.is_none() || o.namespace.as_deref() == namespace)
            .filter(|o| label_selector.map_or(true, |s| matches_selector(&o.object, s)))
            .map(|o| o.object.clone())
            .collect())
    }

    async fn get(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
    ) -> CollectionResult<Option<Value>> {
        let objects = lock(&self.objects);
        Ok(objects
            .iter()
            .find(|o| o.gvr == *gvr && o.namespace.as_deref() == namespace && o.name == name)
            .map(|o| o.object.clone()))
    }

    async fn apply(&self, resource: &ApiResource, object: &Value) -> CollectionResult<Value> {
        if lock(&self.rejected_kinds).contains(&resource.kind) {
            return Err(CollectionError::Request {
                target: resource.gvr.to_string(),
                reason: format!("admission denied for {}", resource.kind),
            });
        }
        self.insert(&resource.gvr, object.clone());
        Ok(object.clone())
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> CollectionResult<()> {
        let mut objects = lock(&self.objects);
        objects.retain(|o| {
            !(o.gvr == resource.gvr && o.namespace.as_deref() == namespace && o.name == name)
        });
        lock(&self.deleted).push(format!(
            "{}/{}/{}",
            resource.gvr.resource,
            namespace.unwrap_or_default(),
            name
        ));
        Ok(())
    }

    async fn resolve_kind(&self, api_version: &str, kind: &str) -> CollectionResult<ApiResource> {
        lock(&self.kinds)
            .iter()
            .find(|k| k.gvr.api_version() == api_version && k.kind == kind)
            .cloned()
            .ok_or_else(|| CollectionError::NotFound(format!("kind {kind} in {api_version}")))
    }
}
