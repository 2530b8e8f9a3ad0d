//! Validation documents and their constructed runtime form.

use std::sync::OnceLock;

use regex::Regex;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use cairn_domains::{build_domain, DomainConfig, DomainContext, DomainKind};
use cairn_model::{Domain, SpecResult, SpecValidationError};
use cairn_providers::{build_provider, ProviderConfig, ProviderKind};

use crate::error::ResolutionError;
use crate::ResolutionResult;

/// Version checked against a document's minimum engine version.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// A validation as written on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ValidationDocument {
    /// Minimum engine version as a semver requirement
    #[serde(default, alias = "cairn-version", skip_serializing_if = "Option::is_none")]
    pub lula_version: Option<String>,
    #[serde(default)]
    pub metadata: ValidationMetadata,
    pub domain: DomainConfig,
    pub provider: ProviderConfig,
}

impl ValidationDocument {
    /// Parse YAML (or JSON) text.
    pub fn parse(raw: &str, source_name: &str) -> ResolutionResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| ResolutionError::Parse {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Fail when the running engine does not satisfy `lula-version`.
    pub fn check_version(&self) -> SpecResult<()> {
        let Some(required) = self.lula_version.as_deref() else {
            return Ok(());
        };
        let req = VersionReq::parse(&strip_v_prefixes(required)).map_err(|e| {
            SpecValidationError::InvalidField {
                item: self.display_name().to_string(),
                field: "lula-version",
                reason: e.to_string(),
            }
        })?;
        let running = Version::parse(ENGINE_VERSION).map_err(|e| SpecValidationError::InvalidField {
            item: "engine".to_string(),
            field: "version",
            reason: e.to_string(),
        })?;
        if req.matches(&running) {
            Ok(())
        } else {
            Err(SpecValidationError::UnsupportedVersion {
                running: ENGINE_VERSION.to_string(),
                required: required.to_string(),
            })
        }
    }

    fn display_name(&self) -> &str {
        if self.metadata.name.is_empty() {
            "validation"
        } else {
            &self.metadata.name
        }
    }

    /// Check the version constraint and build the domain and provider.
    pub fn build(self, identity: impl Into<String>, ctx: &DomainContext) -> SpecResult<Validation> {
        self.check_version()?;
        let domain = build_domain(&self.domain, ctx)?;
        let provider = build_provider(&self.provider)?;
        Ok(Validation {
            identity: identity.into(),
            name: self.metadata.name,
            uuid: self.metadata.uuid,
            domain,
            provider,
        })
    }
}

/// `>= v0.2.0` is accepted as `>= 0.2.0`.
fn strip_v_prefixes(req: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"v(\d)").expect("version prefix pattern is valid"))
        .replace_all(req, "$1")
        .into_owned()
}

/// A constructed, immutable validation ready to run.
#[derive(Debug)]
pub struct Validation {
    /// Embedded UUID, or the resolved path or URL
    pub identity: String,
    pub name: String,
    pub uuid: Option<String>,
    pub domain: DomainKind,
    pub provider: ProviderKind,
}

impl Validation {
    pub fn is_executable(&self) -> bool {
        self.domain.is_executable()
    }

    /// Name for logs and reports; falls back to the identity.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.identity
        } else {
            &self.name
        }
    }
}
