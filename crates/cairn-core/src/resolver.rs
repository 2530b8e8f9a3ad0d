//! Resolve validation links into runnable validations.
//!
//! Link forms:
//! - `#<uuid>`: a back-matter resource whose description holds the document
//! - `file://<path>` or a bare path: a local file, relative to the context directory
//! - `http(s)://...`: a remote document
//!
//! Any form may carry an `@<hex>` checksum suffix, verified before the
//! document is rendered.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};
use url::Url;

use cairn_domains::{ClusterClient, DomainContext};
use cairn_model::CancellationToken;
use cairn_oscal::BackMatter;

use crate::checksum::{split_checksum, verify};
use crate::config::CairnConfig;
use crate::error::ResolutionError;
use crate::template::{RenderMode, TemplateRenderer};
use crate::validation::{Validation, ValidationDocument};
use crate::ResolutionResult;

/// Where a link points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Embedded(String),
    Local(PathBuf),
    Remote(Url),
}

/// A parsed validation link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub link: String,
    pub target: LinkTarget,
    pub checksum: Option<String>,
}

impl Reference {
    /// Parse `link`; relative paths are anchored at `base_dir`.
    pub fn parse(link: &str, base_dir: &Path) -> ResolutionResult<Self> {
        let malformed = |reason: &str| ResolutionError::MalformedLink {
            link: link.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = link.trim();
        if trimmed.is_empty() {
            return Err(malformed("empty link"));
        }
        let (location, checksum) = split_checksum(trimmed);

        let target = if let Some(uuid) = location.strip_prefix('#') {
            if uuid.is_empty() {
                return Err(malformed("missing uuid after '#'"));
            }
            LinkTarget::Embedded(uuid.to_string())
        } else if location.starts_with("http://") || location.starts_with("https://") {
            LinkTarget::Remote(Url::parse(location).map_err(|e| malformed(&e.to_string()))?)
        } else if let Some(path) = location.strip_prefix("file://") {
            if path.is_empty() {
                return Err(malformed("missing path after file://"));
            }
            LinkTarget::Local(base_dir.join(path))
        } else if let Some((scheme, _)) = location.split_once("://") {
            return Err(malformed(&format!("unsupported scheme '{scheme}'")));
        } else {
            LinkTarget::Local(base_dir.join(location))
        };

        Ok(Self {
            link: link.to_string(),
            target,
            checksum: checksum.map(str::to_string),
        })
    }

    /// Key under which one run resolves and executes a validation once.
    pub fn identity(&self) -> String {
        match &self.target {
            LinkTarget::Embedded(uuid) => uuid.to_ascii_lowercase(),
            LinkTarget::Local(path) => path.display().to_string(),
            LinkTarget::Remote(url) => url.to_string(),
        }
    }
}

/// What a link is resolved against.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Directory of the artifact holding the link
    pub base_dir: PathBuf,
    /// Back-matter of that artifact, for embedded validations
    pub back_matter: Option<BackMatter>,
}

impl ResolveContext {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            back_matter: None,
        }
    }

    pub fn with_back_matter(mut self, back_matter: Option<BackMatter>) -> Self {
        self.back_matter = back_matter;
        self
    }
}

/// A built validation plus its document with sensitive variables masked.
#[derive(Debug)]
pub struct ResolvedValidation {
    pub validation: Validation,
    pub document: ValidationDocument,
}

pub struct Resolver {
    http: reqwest::Client,
    remote_timeout: Duration,
    renderer: TemplateRenderer,
    cluster: Option<Arc<dyn ClusterClient>>,
}

impl Resolver {
    pub fn new(renderer: TemplateRenderer, remote_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            remote_timeout,
            renderer,
            cluster: None,
        }
    }

    pub fn from_config(config: &CairnConfig) -> Self {
        Self::new(config.renderer(), config.remote_timeout())
    }

    /// Use `cluster` for Kubernetes domains instead of inferring a connection.
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub async fn resolve(
        &self,
        link: &str,
        ctx: &ResolveContext,
        cancel: &CancellationToken,
    ) -> ResolutionResult<ResolvedValidation> {
        let reference = Reference::parse(link, &ctx.base_dir)?;
        self.resolve_reference(&reference, ctx, cancel).await
    }

    #[instrument(skip_all, fields(link = %reference.link))]
    pub async fn resolve_reference(
        &self,
        reference: &Reference,
        ctx: &ResolveContext,
        cancel: &CancellationToken,
    ) -> ResolutionResult<ResolvedValidation> {
        let raw = self.content(reference, ctx, cancel).await?;
        if let Some(expected) = &reference.checksum {
            verify(raw.as_bytes(), expected)?;
        }

        let identity = reference.identity();
        let document =
            ValidationDocument::parse(&self.renderer.render(&raw, RenderMode::All), &identity)?;
        let masked =
            ValidationDocument::parse(&self.renderer.render(&raw, RenderMode::Masked), &identity)?;

        let base_dir = match &reference.target {
            LinkTarget::Local(path) => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| ctx.base_dir.clone()),
            _ => ctx.base_dir.clone(),
        };
        let mut domain_ctx = DomainContext::new(base_dir);
        if let Some(cluster) = &self.cluster {
            domain_ctx = domain_ctx.with_cluster(Arc::clone(cluster));
        }

        let validation = document.build(identity, &domain_ctx)?;
        debug!(identity = %validation.identity, name = %validation.name, "resolved validation");
        Ok(ResolvedValidation {
            validation,
            document: masked,
        })
    }

    async fn content(
        &self,
        reference: &Reference,
        ctx: &ResolveContext,
        cancel: &CancellationToken,
    ) -> ResolutionResult<String> {
        if cancel.is_cancelled() {
            return Err(ResolutionError::Cancelled);
        }
        match &reference.target {
            LinkTarget::Embedded(uuid) => ctx
                .back_matter
                .as_ref()
                .and_then(|bm| bm.find(uuid))
                .and_then(|resource| resource.description.clone())
                .ok_or_else(|| ResolutionError::EmbeddedNotFound(uuid.clone())),
            LinkTarget::Local(path) => {
                with_cancel(cancel, async {
                    tokio::fs::read_to_string(path)
                        .await
                        .map_err(|source| ResolutionError::Read {
                            path: path.clone(),
                            source,
                        })
                })
                .await
            }
            LinkTarget::Remote(url) => self.fetch(url, cancel).await,
        }
    }

    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> ResolutionResult<String> {
        let target = url.to_string();
        let request = async {
            let response = self
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|e| ResolutionError::Fetch {
                    url: target.clone(),
                    reason: e.to_string(),
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(ResolutionError::HttpStatus {
                    url: target.clone(),
                    status: status.as_u16(),
                });
            }
            response.text().await.map_err(|e| ResolutionError::Fetch {
                url: target.clone(),
                reason: e.to_string(),
            })
        };

        let timed = async {
            tokio::time::timeout(self.remote_timeout, request)
                .await
                .map_err(|_| ResolutionError::TimedOut {
                    url: target.clone(),
                    timeout: self.remote_timeout,
                })?
        };
        with_cancel(cancel, timed).await
    }
}

async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> ResolutionResult<T>
where
    F: Future<Output = ResolutionResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolutionError::Cancelled),
        out = fut => out,
    }
}
