//! HTTP transport seam.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use crate::auth::TokenProvider;
use crate::config::WarehouseConfig;
use crate::error::WarehouseError;

/// Raw HTTP response: status plus undecoded body.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one JSON POST to an API path. Implementations must not retry;
/// the executor owns retry policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, path: &str, body: &Value)
        -> Result<TransportResponse, WarehouseError>;
}

/// reqwest-backed transport with bearer authentication.
pub struct HttpTransport {
    http: Client,
    config: WarehouseConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpTransport {
    pub fn new(
        config: WarehouseConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, WarehouseError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| WarehouseError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    fn request(&self, url: &str, token: &str, body: &Value) -> RequestBuilder {
        self.http.post(url).bearer_auth(token).json(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<TransportResponse, WarehouseError> {
        let url = self.config.url_for(path);
        let token = self.tokens.access_token().await?;

        debug!("POST {}", url);

        let response = self.request(&url, &token, body).send().await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
    use serde_json::json;

    #[test]
    fn test_request_headers() {
        let transport = HttpTransport::new(
            WarehouseConfig::new("proj"),
            Arc::new(StaticToken::new("secret")),
        )
        .unwrap();
        let request = transport
            .request("https://warehouse.test/q", "secret", &json!({"query": "SELECT 1"}))
            .build()
            .unwrap();

        let content_types: Vec<&str> = request
            .headers()
            .get_all(CONTENT_TYPE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(content_types, vec!["application/json"]);
        assert_eq!(
            request.headers()[AUTHORIZATION].to_str().unwrap(),
            "Bearer secret"
        );
    }
}
