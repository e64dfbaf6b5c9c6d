use super::PolicySource;
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::snapshot::{PolicyDelta, PolicySnapshot, SourceMetadata};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Policy source reached over HTTP
///
/// Endpoints, relative to the configured base URL:
/// - `GET /policy_store/{id}/metadata`
/// - `GET /policy_store/{id}/snapshot`
/// - `GET /policy_store/{id}/changes?since={version}` (optional)
pub struct HttpPolicySource {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpPolicySource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| Error::InvalidConfig(format!("Invalid policy source endpoint {}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "Policy source endpoint {} cannot carry a path",
                endpoint
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Self::new(
            config.endpoint.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// Store ids are pushed as a single escaped path segment
    fn url(&self, store_id: &str, resource: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidConfig(format!("Endpoint {} cannot carry a path", self.endpoint)))?
            .pop_if_empty()
            .extend(["policy_store", store_id, resource]);
        Ok(url)
    }

    async fn send(&self, url: &Url, query: &[(&str, &str)]) -> Result<Response> {
        self.client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| self.request_error(e))
    }

    async fn decode<T: DeserializeOwned>(&self, url: &Url, response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::SourceStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.request_error(e))?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::MalformedResponse(format!("{}: {}", url, e)))
    }

    fn request_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Http(e)
        }
    }
}

#[async_trait]
impl PolicySource for HttpPolicySource {
    async fn fetch_metadata(&self, store_id: &str) -> Result<SourceMetadata> {
        let url = self.url(store_id, "metadata")?;
        let response = self.send(&url, &[]).await?;
        self.decode(&url, response).await
    }

    async fn fetch_snapshot(&self, store_id: &str) -> Result<PolicySnapshot> {
        let url = self.url(store_id, "snapshot")?;
        let response = self.send(&url, &[]).await?;
        let snapshot: PolicySnapshot = self.decode(&url, response).await?;
        snapshot.validate()?;
        debug!(
            "Fetched snapshot {} with {} policies from {}",
            snapshot.version,
            snapshot.policy_count(),
            url
        );
        Ok(snapshot)
    }

    async fn fetch_changes(
        &self,
        store_id: &str,
        since_version: &str,
    ) -> Result<Option<PolicyDelta>> {
        let url = self.url(store_id, "changes")?;
        let response = self.send(&url, &[("since", since_version)]).await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NOT_IMPLEMENTED => {
                debug!("Policy source has no change feed at {}", url);
                Ok(None)
            }
            _ => Ok(Some(self.decode(&url, response).await?)),
        }
    }
}
