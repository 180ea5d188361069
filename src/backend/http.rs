//! HTTP implementation of the backend engine interface.
//!
//! Routes:
//! - `POST   {base}/internal/search/{strategy}`        submit
//! - `POST   {base}/internal/search/{strategy}/{id}`   poll
//! - `DELETE {base}/internal/search/{strategy}/{id}`   delete

use super::traits::{BackendError, SearchBackend};
use crate::search::types::SearchResponse;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub struct HttpSearchBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSearchBackend {
    /// Create a backend client for the given base URL.
    ///
    /// No request timeout is set on the client itself: searches are
    /// long-running by design, and the interceptor owns timeout policy.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self, strategy: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/internal/search/{}/{}", self.base_url, strategy, id),
            None => format!("{}/internal/search/{}", self.base_url, strategy),
        }
    }

    /// Issue a request, racing it against the abort token.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        abort: &CancellationToken,
    ) -> Result<SearchResponse, BackendError> {
        let send = request.send();
        let response = tokio::select! {
            _ = abort.cancelled() => return Err(BackendError::Aborted),
            result = send => result.map_err(|e| BackendError::Network(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .json::<Value>()
                .await
                .unwrap_or_else(|_| Value::Null);
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| BackendError::Network(format!("malformed search response: {e}")))
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn submit(
        &self,
        strategy: &str,
        params: &Value,
        abort: &CancellationToken,
    ) -> Result<SearchResponse, BackendError> {
        let url = self.search_url(strategy, None);
        self.execute(self.client.post(url).json(params), abort).await
    }

    async fn poll(
        &self,
        strategy: &str,
        id: &str,
        abort: &CancellationToken,
    ) -> Result<SearchResponse, BackendError> {
        let url = self.search_url(strategy, Some(id));
        self.execute(self.client.post(url).json(&Value::Object(Default::default())), abort)
            .await
    }

    async fn delete(&self, strategy: &str, id: &str) -> Result<(), BackendError> {
        let url = self.search_url(strategy, Some(id));
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .json::<Value>()
                .await
                .unwrap_or_else(|_| Value::Null);
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
