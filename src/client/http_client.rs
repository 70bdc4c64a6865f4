//! HTTP transport for the Home Assistant REST API
//!
//! Sends bearer-token authenticated requests and hands back status plus body.
//! Retry and status classification are done one layer up.

use crate::client::{ApiRequest, HassTransport, HttpMethod, RawResponse};
use crate::config::HassConfig;
use crate::error::{HassError, Result};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, warn};
use url::Url;

/// reqwest-backed transport
pub struct HassHttpClient {
    /// HTTP client instance
    client: Client,

    /// Base URL of the controller
    base_url: Url,
}

impl HassHttpClient {
    /// Create a new HTTP transport
    pub fn new(config: &HassConfig) -> Result<Self> {
        let mut client_builder = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(format!("hass-scenes-mcp/{}", env!("CARGO_PKG_VERSION")));

        if !config.verify_ssl {
            warn!("SSL verification disabled - this is insecure for production use");
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let mut default_headers = reqwest::header::HeaderMap::new();
        let header_value =
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", config.token.trim()))
                .map_err(|e| HassError::config(format!("Invalid access token: {e}")))?;
        default_headers.insert(reqwest::header::AUTHORIZATION, header_value);
        client_builder = client_builder.default_headers(default_headers);

        let client = client_builder
            .build()
            .map_err(|e| HassError::connection(format!("Failed to build HTTP client: {e}")))?;

        // A base without trailing slash would make `join` drop its last segment.
        let mut base_url = config.url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    /// Build URL for API endpoint
    fn build_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| HassError::config(format!("Invalid URL path {path}: {e}")))
    }
}

#[async_trait]
impl HassTransport for HassHttpClient {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
        let url = self.build_url(&request.path)?;
        debug!("{} {}", request.method, url);

        let builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HassError::connection(format!("HTTP request timed out: {e}"))
            } else {
                HassError::connection(format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HassError::connection(format!("Failed to read response body: {e}")))?;

        debug!("HTTP response {status} ({} bytes)", body.len());
        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> HassConfig {
        HassConfig {
            url: url.parse().unwrap(),
            token: "token".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_url_keeps_base_path() {
        let client = HassHttpClient::new(&config("http://proxy.local/ha")).unwrap();
        let url = client.build_url("api/states").unwrap();
        assert_eq!(url.as_str(), "http://proxy.local/ha/api/states");

        let client = HassHttpClient::new(&config("http://ha.local:8123")).unwrap();
        let url = client.build_url("/api/config/scene/config/movie").unwrap();
        assert_eq!(url.as_str(), "http://ha.local:8123/api/config/scene/config/movie");
    }

    #[test]
    fn test_rejects_unprintable_token() {
        let mut cfg = config("http://ha.local:8123");
        cfg.token = "bad\ntoken".to_string();
        assert!(matches!(HassHttpClient::new(&cfg), Err(HassError::Config(_))));
    }
}
