//! Search interceptors.
//!
//! Composition, not inheritance: [`SearchInterceptor`] is the minimal
//! surface callers program against. [`BaseSearchInterceptor`] implements it
//! with single-shot semantics (synchronous strategies); the session-aware
//! [`SessionSearchInterceptor`] is constructed around a base and layers
//! polling, request hashing, the response cache and session registration on
//! top. A deployment picks one at construction time.

pub mod base;
pub mod session;

pub use base::BaseSearchInterceptor;
pub use session::SessionSearchInterceptor;

use crate::search::errors::{SearchError, TimeoutMode};
use crate::search::notify::{NotificationGate, NotificationSink};
use crate::search::stream::SearchStream;
use crate::search::types::{SearchOptions, SearchRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Tunables shared by both interceptor flavors.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// How long a single search may run before it is timed out.
    pub timeout: Duration,
    /// Delay between poll attempts for asynchronous strategies.
    pub poll_interval: Duration,
    /// What the deployment can do about timeouts; selects the toast message.
    pub timeout_mode: TimeoutMode,
    /// Cool-down window for the timeout toast.
    pub notification_window: Duration,
    /// Response cache entry bound.
    pub cache_max_items: usize,
    /// Response cache aggregate size bound, in megabytes.
    pub cache_max_size_mb: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(1000),
            timeout_mode: TimeoutMode::Contact,
            notification_window: Duration::from_secs(30),
            cache_max_items: 50,
            cache_max_size_mb: 10,
        }
    }
}

/// Intercepts every search issued by the application.
pub trait SearchInterceptor: Send + Sync {
    /// Issue a search. The returned stream yields every response and ends
    /// with the terminal one or a classified error; dropping it before
    /// completion releases the caller's interest in the search.
    fn search(&self, request: SearchRequest, options: SearchOptions) -> SearchStream;

    /// Abort every in-flight search. Searches issued afterwards are
    /// unaffected.
    fn cancel_pending(&self);

    /// Process-wide in-flight search counter, for a global loading
    /// indicator.
    fn pending_count(&self) -> watch::Receiver<usize>;

    /// Teardown: abort in-flight searches and drop cached responses.
    fn stop(&self);
}

/// One-shot error classification at the engine/caller boundary, including
/// the gated timeout toast.
pub(crate) struct ErrorClassifier {
    sink: Arc<dyn NotificationSink>,
    gate: NotificationGate,
    mode: TimeoutMode,
}

impl ErrorClassifier {
    pub(crate) fn new(
        sink: Arc<dyn NotificationSink>,
        mode: TimeoutMode,
        notification_window: Duration,
    ) -> Self {
        Self {
            sink,
            gate: NotificationGate::new(notification_window),
            mode,
        }
    }

    /// Classify a failed search.
    ///
    /// The timeout component wins over whatever error the poll loop
    /// surfaced: an abort observed after the timeout fired *is* the timeout.
    /// Anything else passes through unchanged: cancellation stays silent,
    /// backend errors were already shaped by [`SearchError::from`].
    pub(crate) fn classify(&self, err: SearchError, timeout: &CancellationToken) -> SearchError {
        if timeout.is_cancelled() {
            if self.gate.should_show("timeout") {
                self.sink.show_error("Search timed out", self.mode.message());
            }
            return SearchError::Timeout { mode: self.mode };
        }
        err
    }
}
