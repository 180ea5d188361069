//! Trait abstraction for the backend query engine.

use crate::search::types::SearchResponse;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Transport-level failure talking to the backend engine.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The call was abandoned because the supplied cancellation fired.
    #[error("request aborted")]
    Aborted,

    /// The backend answered with a non-success status.
    #[error("backend returned status {status}")]
    Status {
        /// HTTP-like status code.
        status: u16,
        /// Decoded error body, for downstream classification.
        body: Value,
    },

    /// The call never produced a response (connection refused, DNS, ...).
    #[error("network failure: {0}")]
    Network(String),
}

/// The backend query engine, per execution strategy.
///
/// One implementation per deployment; held as `Arc<dyn SearchBackend>` by the
/// interceptor and the session monitor. All calls are cancellable through the
/// supplied token except `delete`, which is a short best-effort cleanup.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Submit a new search. The response may already be terminal (sync
    /// strategy) or carry the async search id to poll with.
    async fn submit(
        &self,
        strategy: &str,
        params: &Value,
        abort: &CancellationToken,
    ) -> Result<SearchResponse, BackendError>;

    /// Fetch the current state of a previously-submitted search.
    async fn poll(
        &self,
        strategy: &str,
        id: &str,
        abort: &CancellationToken,
    ) -> Result<SearchResponse, BackendError>;

    /// Release the backend-side resources of a search. Best-effort; callers
    /// log failures and move on.
    async fn delete(&self, strategy: &str, id: &str) -> Result<(), BackendError>;
}
