//! Fallback origins consulted when the primary node cannot serve a key

use async_trait::async_trait;
use replistore_common::{BlobObject, DEFAULT_CONTENT_TYPE, Error, Result};
use std::time::Duration;
use tracing::{debug, info};

/// External origin that can produce a blob the local nodes do not have
#[async_trait]
pub trait ThirdPartySource: Send + Sync {
    /// Display name used in logs
    fn name(&self) -> &str;

    /// Fetch the object stored under `key`
    async fn fetch(&self, key: &str) -> Result<BlobObject>;
}

/// Synthesizes a payload for any key after a simulated network delay
#[derive(Debug, Clone)]
pub struct MockThirdPartySource {
    name: String,
    endpoint: String,
    latency: Duration,
}

impl MockThirdPartySource {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            latency: Duration::from_millis(200),
        }
    }

    /// Override the simulated latency
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Payload returned for `key`
    #[must_use]
    pub fn payload_for(key: &str) -> String {
        format!("Mock data from third party service for key: {key}")
    }
}

#[async_trait]
impl ThirdPartySource for MockThirdPartySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, key: &str) -> Result<BlobObject> {
        debug!("Fetching {} from {}", key, self.endpoint);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let object = BlobObject::new(key, DEFAULT_CONTENT_TYPE, Self::payload_for(key));
        info!(
            "Fetched {} from {} ({} bytes)",
            key,
            self.name,
            object.size()
        );
        Ok(object)
    }
}

/// Fetches `GET <endpoint>/<key>` from an HTTP origin
#[derive(Debug, Clone)]
pub struct HttpThirdPartySource {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpThirdPartySource {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(name, endpoint, client))
    }

    pub fn with_client(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ThirdPartySource for HttpThirdPartySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, key: &str) -> Result<BlobObject> {
        let url = self.url_for(key);
        debug!("Fetching {} from {}", key, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ConnectionFailed(format!(
                "{url} returned {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        info!("Fetched {} from {} ({} bytes)", key, self.name, body.len());
        Ok(BlobObject::new(key, content_type, body))
    }
}
