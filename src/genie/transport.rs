use crate::config::GenieConfig;
use crate::genie::{GenieError, HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use tracing::debug;

/// `HttpTransport` backed by a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(config: &GenieConfig) -> Result<Self, GenieError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GenieError::TransportError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.host.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GenieError> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("{} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method, &url)
            .header("Authorization", format!("Bearer {}", request.bearer_token))
            .header("Content-Type", "application/json");

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenieError::TransportError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenieError::TransportError(format!("Failed to read response body: {}", e)))?;

        debug!("Response {} from {}: {} bytes", status, url, body.len());
        Ok(HttpResponse { status, body })
    }
}
