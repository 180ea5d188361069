//! Request/response shapes shared by the interceptor, the polling engine and
//! the backend seam.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Default execution path: the backend's asynchronous engine (submit once,
/// poll by id until done).
pub const ASYNC_SEARCH_STRATEGY: &str = "async";

/// Synchronous execution path: the backend blocks until the search is done
/// and the first response is terminal.
pub const SYNC_SEARCH_STRATEGY: &str = "sync";

/// A search request as issued by a caller.
///
/// `params` is opaque backend-specific request content. `id` is unset on the
/// first submission; once the backend acknowledges the search it assigns an
/// async search id, which follow-up polls (and restored sessions) reuse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Backend-specific request parameters.
    pub params: Value,
    /// Backend-assigned async search id, if already known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Execution path override; falls back to the per-call option, then to
    /// [`ASYNC_SEARCH_STRATEGY`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl SearchRequest {
    /// A request carrying the given backend parameters.
    pub fn new(params: Value) -> Self {
        Self {
            params,
            id: None,
            strategy: None,
        }
    }
}

/// A single response produced by the backend for a search.
///
/// Terminal when `is_running` is false. A terminal response with
/// `is_partial` set represents a search that ended without completing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResponse {
    /// Backend-assigned async search id.
    pub id: Option<String>,
    /// Whether the backend is still working on the search.
    pub is_running: bool,
    /// Whether the results gathered so far are incomplete.
    pub is_partial: bool,
    /// Opaque result payload.
    pub raw_response: Value,
    /// Progress counter (strategy-specific units).
    pub loaded: Option<u64>,
    /// Progress total (strategy-specific units).
    pub total: Option<u64>,
}

impl SearchResponse {
    /// True once the backend will produce no further responses.
    pub fn is_terminal(&self) -> bool {
        !self.is_running
    }
}

/// Per-call options for [`SearchInterceptor::search`].
///
/// [`SearchInterceptor::search`]: crate::search::interceptor::SearchInterceptor::search
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Session this search belongs to, if any. Session hooks and client-side
    /// caching only apply when this names the currently active session.
    pub session_id: Option<String>,
    /// Caller-supplied cancellation; merged with the interceptor-wide token
    /// and the per-request timeout.
    pub abort: Option<CancellationToken>,
    /// Execution path override for this call.
    pub strategy: Option<String>,
    /// Set when replaying a search from a restored session: the stored async
    /// search id is re-attached instead of submitting fresh.
    pub is_restore: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_wire_shape() {
        let json = r#"{"id":"abc","isRunning":true,"isPartial":true,"rawResponse":{"took":3},"loaded":1,"total":10}"#;
        let resp: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id.as_deref(), Some("abc"));
        assert!(resp.is_running);
        assert!(resp.is_partial);
        assert!(!resp.is_terminal());
        assert_eq!(resp.loaded, Some(1));
        assert_eq!(resp.total, Some(10));
    }

    #[test]
    fn test_response_defaults_missing_fields() {
        let resp: SearchResponse = serde_json::from_str(r#"{"rawResponse":{}}"#).unwrap();
        assert!(resp.id.is_none());
        assert!(!resp.is_running);
        assert!(!resp.is_partial);
        assert!(resp.is_terminal());
    }

    #[test]
    fn test_request_skips_absent_fields() {
        let req = SearchRequest::new(serde_json::json!({"query": "q"}));
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("\"strategy\""));
    }
}
