//! HTTP object store client

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error};

use crate::errors::PlatformError;
use crate::store::ObjectStore;

/// Writes objects with `PUT <endpoint>/<key>`
pub struct HttpStore {
    client: Client,
    endpoint: String,
    access_key_id: String,
    secret_access_key: SecretString,
}

impl HttpStore {
    pub fn new(
        endpoint: &str,
        access_key_id: String,
        secret_access_key: SecretString,
    ) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_key_id,
            secret_access_key,
        })
    }

    /// Get the write endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), PlatformError> {
        let url = format!("{}/{}", self.endpoint, key);
        debug!("PUT {} ({} bytes, {})", url, body.len(), content_type);

        let response = self
            .client
            .put(&url)
            .basic_auth(&self.access_key_id, Some(self.secret_access_key.expose_secret()))
            .header(header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Object PUT failed: {} - {}", status, body);
            return Err(PlatformError::StoreError(format!("{} {}: {}", key, status, body)));
        }

        Ok(())
    }
}
