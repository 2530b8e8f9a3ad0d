//! Cluster access over the Kubernetes REST API.
//!
//! Connection settings come from a kubeconfig file (`KUBECONFIG`, then
//! `~/.kube/config`) or, inside a pod, from the mounted service account.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use cairn_model::{CollectionError, CollectionResult};

use super::client::{api_root, ApiResource, ClusterClient, GroupVersionResource};
use super::{object_name, object_namespace};

/// Field manager recorded on server-side applies.
pub const FIELD_MANAGER: &str = "cairn";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Resolved connection settings.
#[derive(Clone, Default)]
pub struct ClusterConfig {
    pub server: String,
    pub token: Option<String>,
    pub ca_pem: Option<Vec<u8>>,
    /// PEM bundle holding the client certificate followed by its key
    pub identity_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub default_namespace: Option<String>,
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("server", &self.server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.is_some())
            .field("identity_pem", &self.identity_pem.is_some())
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("default_namespace", &self.default_namespace)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<PathBuf>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
    #[serde(default)]
    client_certificate: Option<PathBuf>,
    #[serde(default)]
    client_key: Option<PathBuf>,
}

fn config_error(reason: impl Into<String>) -> CollectionError {
    CollectionError::Config(reason.into())
}

fn decode_b64(what: &str, data: &str) -> CollectionResult<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| config_error(format!("{what} is not valid base64: {e}")))
}

fn read_relative(base: &Path, path: &Path) -> CollectionResult<Vec<u8>> {
    let full = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    std::fs::read(&full).map_err(|e| config_error(format!("{}: {e}", full.display())))
}

impl ClusterConfig {
    /// Pick the first available source: `KUBECONFIG`, `~/.kube/config`, then
    /// the in-cluster service account.
    pub fn infer() -> CollectionResult<Self> {
        if let Ok(paths) = std::env::var("KUBECONFIG") {
            if let Some(first) = std::env::split_paths(&paths).find(|p| p.exists()) {
                return Self::from_kubeconfig(&first, None);
            }
        }
        if let Some(home) = std::env::var_os("HOME") {
            let path = PathBuf::from(home).join(".kube").join("config");
            if path.exists() {
                return Self::from_kubeconfig(&path, None);
            }
        }
        Self::in_cluster()
    }

    /// Load a kubeconfig file, using `context` or its current context.
    pub fn from_kubeconfig(path: &Path, context: Option<&str>) -> CollectionResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("{}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_kubeconfig_str(&raw, context, base)
    }

    /// Parse kubeconfig YAML. Relative file references resolve against `base`.
    pub fn from_kubeconfig_str(
        raw: &str,
        context: Option<&str>,
        base: &Path,
    ) -> CollectionResult<Self> {
        let kc: Kubeconfig = serde_yaml::from_str(raw)
            .map_err(|e| config_error(format!("invalid kubeconfig: {e}")))?;

        let context_name = context
            .map(str::to_string)
            .or_else(|| kc.current_context.clone())
            .ok_or_else(|| config_error("kubeconfig has no current-context"))?;
        let ctx = kc
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .ok_or_else(|| config_error(format!("context '{context_name}' not found")))?;
        let cluster = kc
            .clusters
            .iter()
            .find(|c| c.name == ctx.context.cluster)
            .ok_or_else(|| config_error(format!("cluster '{}' not found", ctx.context.cluster)))?;
        let user = match &ctx.context.user {
            Some(name) => kc.users.iter().find(|u| &u.name == name).map(|u| &u.user),
            None => None,
        };

        let ca_pem = match (
            &cluster.cluster.certificate_authority_data,
            &cluster.cluster.certificate_authority,
        ) {
            (Some(data), _) => Some(decode_b64("certificate-authority-data", data)?),
            (None, Some(path)) => Some(read_relative(base, path)?),
            (None, None) => None,
        };

        let mut config = ClusterConfig {
            server: cluster.cluster.server.clone(),
            ca_pem,
            insecure_skip_tls_verify: cluster.cluster.insecure_skip_tls_verify,
            default_namespace: ctx.context.namespace.clone(),
            ..Default::default()
        };

        if let Some(user) = user {
            config.token = match (&user.token, &user.token_file) {
                (Some(token), _) => Some(token.clone()),
                (None, Some(path)) => {
                    let bytes = read_relative(base, path)?;
                    Some(String::from_utf8_lossy(&bytes).trim().to_string())
                }
                (None, None) => None,
            };

            let cert = match (&user.client_certificate_data, &user.client_certificate) {
                (Some(data), _) => Some(decode_b64("client-certificate-data", data)?),
                (None, Some(path)) => Some(read_relative(base, path)?),
                (None, None) => None,
            };
            let key = match (&user.client_key_data, &user.client_key) {
                (Some(data), _) => Some(decode_b64("client-key-data", data)?),
                (None, Some(path)) => Some(read_relative(base, path)?),
                (None, None) => None,
            };
            config.identity_pem = match (cert, key) {
                (Some(mut cert), Some(key)) => {
                    cert.push(b'\n');
                    cert.extend_from_slice(&key);
                    Some(cert)
                }
                (None, None) => None,
                _ => return Err(config_error("client certificate and key must be set together")),
            };
        }

        Ok(config)
    }

    /// Settings from the service account mounted into a pod.
    pub fn in_cluster() -> CollectionResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| config_error("no kubeconfig found and not running in a cluster"))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let dir = Path::new(SERVICE_ACCOUNT_DIR);

        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| config_error(format!("service account token: {e}")))?;
        let ca_pem = std::fs::read(dir.join("ca.crt")).ok();
        let default_namespace = std::fs::read_to_string(dir.join("namespace"))
            .ok()
            .map(|ns| ns.trim().to_string());

        // IPv6 hosts need brackets in the URL authority.
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        Ok(ClusterConfig {
            server: format!("https://{host}:{port}"),
            token: Some(token.trim().to_string()),
            ca_pem,
            identity_pem: None,
            insecure_skip_tls_verify: false,
            default_namespace,
        })
    }
}

/// [`ClusterClient`] over HTTPS.
#[derive(Debug, Clone)]
pub struct RestClusterClient {
    server: String,
    token: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default, rename = "apiVersion")]
    api_version: Option<String>,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryList {
    #[serde(default)]
    resources: Vec<DiscoveredResource>,
}

#[derive(Debug, Deserialize)]
struct DiscoveredResource {
    name: String,
    kind: String,
    #[serde(default)]
    namespaced: bool,
}

impl RestClusterClient {
    pub fn new(config: ClusterConfig) -> CollectionResult<Self> {
        Url::parse(&config.server)
            .map_err(|e| config_error(format!("invalid server '{}': {e}", config.server)))?;

        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("cairn/", env!("CARGO_PKG_VERSION")));
        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| config_error(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = &config.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| config_error(format!("invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }
        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| config_error(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            server: config.server.trim_end_matches('/').to_string(),
            token: config.token,
            http,
        })
    }

    /// Connect with [`ClusterConfig::infer`].
    pub fn infer() -> CollectionResult<Self> {
        Self::new(ClusterConfig::infer()?)
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> CollectionResult<Url> {
        let mut url = Url::parse(&format!("{}{}", self.server, path))
            .map_err(|e| config_error(format!("invalid request path {path}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Send a request. `Ok(None)` on 404, decoded JSON on success.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        target: &str,
    ) -> CollectionResult<Option<Value>> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|e| CollectionError::Request {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CollectionError::HttpStatus {
                target: target.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(|e| CollectionError::Request {
            target: target.to_string(),
            reason: e.to_string(),
        })?;
        let value = serde_json::from_slice(&bytes).map_err(|e| CollectionError::Decode {
            target: target.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(value))
    }
}

#[async_trait]
impl ClusterClient for RestClusterClient {
    async fn list(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> CollectionResult<Vec<Value>> {
        let path = gvr.collection_path(namespace);
        let query: Vec<(&str, &str)> = label_selector
            .map(|s| vec![("labelSelector", s)])
            .unwrap_or_default();
        let url = self.url(&path, &query)?;
        debug!(%url, "listing");

        let Some(body) = self.send(self.http.get(url), &path).await? else {
            return Err(CollectionError::NotFound(gvr.to_string()));
        };
        let list: ObjectList = serde_json::from_value(body)?;

        // List items omit apiVersion and kind; restore them from the list.
        let item_kind = list
            .kind
            .as_deref()
            .and_then(|k| k.strip_suffix("List"))
            .map(str::to_string);
        Ok(list
            .items
            .into_iter()
            .map(|mut item| {
                if let Some(obj) = item.as_object_mut() {
                    if let (Some(kind), false) = (&item_kind, obj.contains_key("kind")) {
                        obj.insert("kind".to_string(), Value::String(kind.clone()));
                    }
                    if let (Some(av), false) = (&list.api_version, obj.contains_key("apiVersion")) {
                        obj.insert("apiVersion".to_string(), Value::String(av.clone()));
                    }
                }
                item
            })
            .collect())
    }

    async fn get(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
    ) -> CollectionResult<Option<Value>> {
        let path = format!("{}/{}", gvr.collection_path(namespace), name);
        let url = self.url(&path, &[])?;
        self.send(self.http.get(url), &path).await
    }

    async fn apply(&self, resource: &ApiResource, object: &Value) -> CollectionResult<Value> {
        let name = object_name(object)
            .ok_or_else(|| config_error("object to apply has no metadata.name"))?;
        let namespace = if resource.namespaced {
            object_namespace(object)
        } else {
            None
        };
        let path = format!("{}/{}", resource.gvr.collection_path(namespace), name);
        let url = self.url(&path, &[("fieldManager", FIELD_MANAGER), ("force", "true")])?;
        let body = serde_json::to_vec(object)?;

        let request = self
            .http
            .patch(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/apply-patch+yaml"))
            .body(body);
        self.send(request, &path)
            .await?
            .ok_or_else(|| CollectionError::NotFound(path))
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> CollectionResult<()> {
        let namespace = if resource.namespaced { namespace } else { None };
        let path = format!("{}/{}", resource.gvr.collection_path(namespace), name);
        let url = self.url(&path, &[("propagationPolicy", "Background")])?;
        self.send(self.http.delete(url), &path).await?;
        Ok(())
    }

    async fn resolve_kind(&self, api_version: &str, kind: &str) -> CollectionResult<ApiResource> {
        let path = api_root(api_version);
        let url = self.url(&path, &[])?;
        let body = self
            .send(self.http.get(url), &path)
            .await?
            .ok_or_else(|| CollectionError::NotFound(format!("API group {api_version}")))?;
        let discovery: DiscoveryList = serde_json::from_value(body)?;

        discovery
            .resources
            .into_iter()
            .find(|r| r.kind == kind && !r.name.contains('/'))
            .map(|r| ApiResource::new(api_version, &r.kind, &r.name, r.namespaced))
            .ok_or_else(|| CollectionError::NotFound(format!("kind {kind} in {api_version}")))
    }
}
