//! HTTP API domain
//!
//! Issues each configured request in order and stores
//! `{"status": <code>, "response": <decoded JSON>}` under the request name.
//! A non-2xx status or an undecodable body aborts the collection.

mod spec;

pub use spec::{ApiOptions, ApiRequest, ApiSpec, HttpMethod, DEFAULT_TIMEOUT};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use cairn_model::{
    cancellable, CancellationToken, CollectionError, CollectionResult, Domain, Resources,
    SpecResult,
};

use spec::PreparedRequest;

/// A validated API domain.
#[derive(Debug, Clone)]
pub struct ApiDomain {
    requests: Vec<PreparedRequest>,
    executable: bool,
}

impl ApiDomain {
    pub fn new(spec: ApiSpec) -> SpecResult<Self> {
        let requests = spec.prepare()?;
        let executable = requests.iter().any(|r| r.method.is_side_effecting());
        Ok(Self {
            requests,
            executable,
        })
    }

    async fn fetch(&self, req: &PreparedRequest) -> CollectionResult<Value> {
        let target = req.url.to_string();
        let mut builder = req
            .client
            .request(req.method.to_reqwest(), req.url.clone())
            .headers(req.headers.clone());
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| CollectionError::Request {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectionError::HttpStatus {
                target,
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| CollectionError::Request {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| CollectionError::Decode {
                target,
                reason: e.to_string(),
            })?
        };

        Ok(json!({ "status": status.as_u16(), "response": body }))
    }
}

#[async_trait]
impl Domain for ApiDomain {
    fn kind(&self) -> &'static str {
        "api"
    }

    fn is_executable(&self) -> bool {
        self.executable
    }

    #[instrument(skip_all, fields(requests = self.requests.len()))]
    async fn get_resources(&self, cancel: &CancellationToken) -> CollectionResult<Resources> {
        let mut resources = Resources::new();
        for req in &self.requests {
            debug!(name = %req.name, method = ?req.method, url = %req.url, "issuing request");
            let value = cancellable(cancel, self.fetch(req)).await?;
            resources.insert(req.name.clone(), value);
        }
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(yaml: &str) -> ApiDomain {
        ApiDomain::new(serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_get_only_domain_is_not_executable() {
        let d = domain("requests:\n  - name: a\n    url: https://example.com\n");
        assert!(!d.is_executable());
    }

    #[test]
    fn test_post_makes_domain_executable() {
        let d = domain(
            r#"
requests:
  - name: a
    url: https://example.com
  - name: b
    url: https://example.com
    method: POST
"#,
        );
        assert!(d.is_executable());
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_before_any_request() {
        let d = domain("requests:\n  - name: a\n    url: http://127.0.0.1:9/unreachable\n");
        let token = CancellationToken::new();
        token.cancel();
        let err = d.get_resources(&token).await.unwrap_err();
        assert!(matches!(err, CollectionError::Cancelled));
    }
}
