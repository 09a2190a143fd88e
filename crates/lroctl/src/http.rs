//! HTTP operations service
//!
//! Snapshots come from `GET {endpoint}/{operation}` and resources from
//! `GET {endpoint}/{link}` (or the link itself when it is absolute). Status
//! codes are classified with [`PollError::from_status`].

use std::time::Duration;

use async_trait::async_trait;
use lroctl_core::{OperationRef, OperationService, PollError, ResourceFetcher, Snapshot};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::{LroctlError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// reqwest-backed client for an operations endpoint
#[derive(Debug, Clone)]
pub struct HttpOperations {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpOperations {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| LroctlError::InvalidInput {
            message: format!("Invalid endpoint '{}': {}", endpoint, e),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(LroctlError::InvalidInput {
                message: format!("Endpoint must be http or https, got '{}'", endpoint),
            });
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("lroctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LroctlError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Absolute URL for a path relative to the endpoint, or an absolute link as-is
    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json(&self, url: &str) -> std::result::Result<Value, PollError> {
        trace!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("GET {} returned {}", url, status);
            return Err(PollError::from_status(status.as_u16(), error_message(&body)));
        }

        response.json::<Value>().await.map_err(|e| {
            PollError::fatal(format!("Invalid JSON from {}", url)).with_source(e)
        })
    }
}

#[async_trait]
impl OperationService for HttpOperations {
    type Snapshot = Snapshot;

    async fn get_operation(
        &self,
        operation: &OperationRef,
    ) -> std::result::Result<Snapshot, PollError> {
        let url = self.resolve(&operation.relative_name());
        let body = self.get_json(&url).await?;
        serde_json::from_value(body).map_err(|e| {
            PollError::fatal(format!("Response from {} is not an operation", url)).with_source(e)
        })
    }
}

#[async_trait]
impl ResourceFetcher<Value> for HttpOperations {
    async fn fetch(&self, link: &str) -> std::result::Result<Value, PollError> {
        self.get_json(&self.resolve(link)).await
    }
}

/// Connection failures and timeouts are worth another poll; the rest are not
fn classify_transport(err: reqwest::Error) -> PollError {
    let message = format!("Request failed: {}", err);
    if err.is_timeout() || err.is_connect() || err.is_request() {
        PollError::transient(message).with_source(err)
    } else {
        PollError::fatal(message).with_source(err)
    }
}

/// Pull `error.message` out of a JSON error body, else use the body itself
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
