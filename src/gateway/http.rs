//! HTTP implementation of [`CmGateway`] on reqwest.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::config::env_or;
use crate::error::{ConfigError, GatewayError};

use super::CmGateway;
use super::types::{CmParty, CmPartyRequest, CmReply, CmResponseBody};

/// Connection settings for CM.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<SecretString>,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from `CM_BASE_URL` (required), `CM_API_KEY` and `CM_HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("CM_BASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("CM_BASE_URL".to_string()))?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "CM_BASE_URL".to_string(),
                message: format!("expected an http(s) URL, got {base_url:?}"),
            });
        }

        let mut config = Self::new(base_url);
        if let Ok(key) = std::env::var("CM_API_KEY") {
            if !key.trim().is_empty() {
                config = config.with_api_key(key);
            }
        }
        let secs: u64 = env_or("CM_HTTP_TIMEOUT_SECS", config.timeout.as_secs())?;
        Ok(config.with_timeout(Duration::from_secs(secs)))
    }
}

/// reqwest-backed CM client.
pub struct HttpCmGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpCmGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "CM_BASE_URL".to_string(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                after: self.config.timeout,
            }
        } else if e.is_decode() {
            GatewayError::Malformed {
                reason: e.to_string(),
            }
        } else {
            GatewayError::Unreachable {
                reason: e.to_string(),
            }
        }
    }

    /// Send a create/update call and interpret the body.
    ///
    /// CM answers business failures with a non-2xx status and an `F` body,
    /// so the body is decoded regardless of the HTTP status.
    async fn send_onboarding(
        &self,
        request: reqwest::RequestBuilder,
        body: &CmPartyRequest,
    ) -> Result<CmReply, GatewayError> {
        let response = self
            .authorize(request)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        match serde_json::from_slice::<CmResponseBody>(&bytes) {
            Ok(decoded) if !status.is_success() && decoded.status.trim().is_empty() => {
                Err(GatewayError::Unreachable {
                    reason: format!("HTTP {status}"),
                })
            }
            Ok(decoded) => decoded.into_reply(),
            Err(e) if status.is_success() => Err(GatewayError::Malformed {
                reason: format!("undecodable response body: {e}"),
            }),
            Err(_) => Err(GatewayError::Unreachable {
                reason: format!("HTTP {status}"),
            }),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self
            .authorize(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, path, "CM read request failed");
            return Err(GatewayError::Unreachable {
                reason: format!("HTTP {status} for {path}"),
            });
        }
        response.json().await.map_err(|e| self.transport_error(e))
    }
}

#[async_trait]
impl CmGateway for HttpCmGateway {
    async fn create_onboarding(&self, request: &CmPartyRequest) -> Result<CmReply, GatewayError> {
        debug!(reference = %request.external_reference, "POST onboarding");
        self.send_onboarding(self.client.post(self.url("onboarding")), request)
            .await
    }

    async fn update_onboarding(&self, request: &CmPartyRequest) -> Result<CmReply, GatewayError> {
        let party_id = request
            .party_id
            .as_deref()
            .ok_or_else(|| GatewayError::Malformed {
                reason: "update request without a party id".to_string(),
            })?;
        debug!(reference = %request.external_reference, party_id, "PUT onboarding");
        let url = self.url(&format!("onboarding/{party_id}"));
        self.send_onboarding(self.client.put(url), request).await
    }

    async fn get_by_external_id(&self, party_id: &str) -> Result<CmParty, GatewayError> {
        self.get_json(&format!("parties/{party_id}")).await
    }

    async fn list(&self) -> Result<Vec<CmParty>, GatewayError> {
        self.get_json("parties").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let config = GatewayConfig::new(" https://cm.example.test/api/ ");
        assert_eq!(config.base_url, "https://cm.example.test/api");
        let gateway = HttpCmGateway::new(config).unwrap();
        assert_eq!(
            gateway.url("onboarding"),
            "https://cm.example.test/api/onboarding"
        );
    }

    #[test]
    fn api_key_is_not_printed() {
        let config = GatewayConfig::new("http://localhost").with_api_key("s3cret");
        assert!(!format!("{config:?}").contains("s3cret"));
    }
}
