//! Serialized form of the `api-spec` block and its validation.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use url::Url;

use cairn_model::{SpecResult, SpecValidationError};

use crate::duration::parse_duration;

/// Timeout applied when neither the request nor the domain sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ApiOptions>,
    #[serde(default)]
    pub requests: Vec<ApiRequest>,
}

/// Client options. A request's own options replace the domain's wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ApiOptions>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "delete")]
    Delete,
    #[serde(alias = "head")]
    Head,
}

impl HttpMethod {
    /// Methods other than GET and HEAD may change remote state.
    pub fn is_side_effecting(self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

/// A request with its URL, method and options fully resolved.
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub name: String,
    pub url: Url,
    pub method: HttpMethod,
    pub body: Option<String>,
    pub timeout: Duration,
    pub headers: HeaderMap,
    pub client: reqwest::Client,
}

impl ApiSpec {
    /// Validate every request and resolve its effective options.
    pub(crate) fn prepare(&self) -> SpecResult<Vec<PreparedRequest>> {
        if self.requests.is_empty() {
            return Err(SpecValidationError::Empty("api-spec requests"));
        }
        self.requests
            .iter()
            .enumerate()
            .map(|(idx, req)| req.prepare(idx, self.options.as_ref()))
            .collect()
    }
}

impl ApiRequest {
    fn prepare(
        &self,
        idx: usize,
        domain_options: Option<&ApiOptions>,
    ) -> SpecResult<PreparedRequest> {
        if self.name.trim().is_empty() {
            return Err(SpecValidationError::MissingField {
                item: format!("request #{idx}"),
                field: "name",
            });
        }
        if self.url.trim().is_empty() {
            return Err(SpecValidationError::MissingField {
                item: format!("request '{}'", self.name),
                field: "url",
            });
        }

        let invalid = |field: &'static str, reason: String| SpecValidationError::InvalidField {
            item: format!("request '{}'", self.name),
            field,
            reason,
        };

        let mut url = Url::parse(self.url.trim()).map_err(|e| invalid("url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("url", format!("unsupported scheme '{}'", url.scheme())));
        }
        if !self.parameters.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.parameters {
                pairs.append_pair(key, value);
            }
        }

        let options = self
            .options
            .as_ref()
            .or(domain_options)
            .cloned()
            .unwrap_or_default();

        let timeout = match options.timeout.as_deref() {
            Some(raw) => parse_duration(raw).map_err(|e| invalid("timeout", e))?,
            None => DEFAULT_TIMEOUT,
        };

        let mut headers = HeaderMap::new();
        for (key, value) in &options.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| invalid("headers", format!("{key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| invalid("headers", format!("{key}: {e}")))?;
            headers.insert(name, value);
        }
        if self.body.is_some() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(raw) = options.proxy.as_deref() {
            let proxy_url = Url::parse(raw).map_err(|e| invalid("proxy", e.to_string()))?;
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| invalid("proxy", e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| invalid("options", e.to_string()))?;

        Ok(PreparedRequest {
            name: self.name.clone(),
            url,
            method: self.method.unwrap_or_default(),
            body: self.body.clone(),
            timeout,
            headers,
            client,
        })
    }
}
