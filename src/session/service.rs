//! The session service: current-session pointer, state machine, and the
//! registry of in-flight searches.
//!
//! One session is "current" at a time. The interceptor registers every
//! session-scoped search here; the service derives the session state from
//! the registry (all tracked searches done ⇒ `Completed`) and exposes a
//! `watch`-based status stream for UI layers and the interceptor's
//! background-save latch.
//!
//! Every mutation is a single synchronous step under one lock; state read
//! after an `await` elsewhere must be re-validated through
//! [`SessionService::is_current`], which is what keeps stale searches from
//! mutating a session they no longer belong to.

use super::store::SessionStore;
use super::types::{SearchStatus, SessionAttributes, SessionState, TrackedSearchInfo};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

struct TrackedSearch {
    info: TrackedSearchInfo,
    abort: CancellationToken,
}

struct SessionInner {
    session_id: Option<String>,
    state: SessionState,
    created: DateTime<Utc>,
    searches: HashMap<String, TrackedSearch>,
}

impl SessionInner {
    fn fresh(state: SessionState) -> Self {
        Self {
            session_id: None,
            state,
            created: Utc::now(),
            searches: HashMap::new(),
        }
    }
}

pub struct SessionService {
    inner: Mutex<SessionInner>,
    status_tx: watch::Sender<SessionState>,
    store: Arc<dyn SessionStore>,
    expiry: chrono::Duration,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, expiry: chrono::Duration) -> Self {
        let (status_tx, _) = watch::channel(SessionState::New);
        Self {
            inner: Mutex::new(SessionInner::fresh(SessionState::New)),
            status_tx,
            store,
            expiry,
        }
    }

    /// Begin a new session, superseding any previous one. Previously-tracked
    /// searches are forgotten (not aborted) and their session keeps whatever
    /// status it already reached.
    pub fn start(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        {
            let mut inner = self.inner.lock().unwrap();
            *inner = SessionInner::fresh(SessionState::New);
            inner.session_id = Some(session_id.clone());
            self.status_tx.send_replace(SessionState::New);
        }
        debug!(session_id = %session_id, "search session started");
        session_id
    }

    /// Adopt an externally-known session id as current, flagged restored so
    /// searches re-attach to stored async search ids instead of submitting
    /// fresh.
    pub fn restore(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        *inner = SessionInner::fresh(SessionState::Restored);
        inner.session_id = Some(session_id.to_string());
        self.status_tx.send_replace(SessionState::Restored);
        debug!(session_id = %session_id, "search session restored");
    }

    /// Deactivate the current session (typically on navigation away from the
    /// owning application). In-flight searches are not aborted; they simply
    /// stop being current, so their late results cannot touch session state.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = SessionInner::fresh(SessionState::New);
        self.status_tx.send_replace(SessionState::New);
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.inner.lock().unwrap().session_id.clone()
    }

    /// Whether `session_id` names the session that is current right now.
    /// Returns false as soon as `clear()` or a new `start()` supersedes it.
    pub fn is_current(&self, session_id: &str) -> bool {
        self.inner.lock().unwrap().session_id.as_deref() == Some(session_id)
    }

    /// Whether responses for this request should be cached client-side.
    /// Only current-session searches are cacheable.
    pub fn should_cache_on_client(&self, session_id: Option<&str>) -> bool {
        match session_id {
            Some(id) => self.is_current(id),
            None => false,
        }
    }

    /// Whether the session has been saved to background. Searches racing
    /// that transition must preserve their backend-side resources.
    pub fn is_stored(&self, session_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.session_id.as_deref() == Some(session_id)
            && inner.state == SessionState::BackgroundLoading
    }

    /// Current-state stream for UI layers and the interceptor.
    pub fn status_stream(&self) -> watch::Receiver<SessionState> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    /// Register a search under the current session. No-op when `session_id`
    /// is no longer current.
    pub fn track_search(
        &self,
        session_id: &str,
        request_hash: &str,
        strategy: &str,
        abort: CancellationToken,
    ) {
        let mut inner = self.inner.lock().unwrap();
        if inner.session_id.as_deref() != Some(session_id) {
            return;
        }
        inner.searches.insert(
            request_hash.to_string(),
            TrackedSearch {
                info: TrackedSearchInfo {
                    id: None,
                    strategy: strategy.to_string(),
                    status: SearchStatus::Running,
                },
                abort,
            },
        );
        if inner.state == SessionState::New {
            inner.state = SessionState::Running;
            self.status_tx.send_replace(SessionState::Running);
        }
    }

    /// Record the backend-assigned async search id once the first response
    /// carries it.
    pub fn track_search_id(&self, session_id: &str, request_hash: &str, search_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.session_id.as_deref() != Some(session_id) {
            return;
        }
        if let Some(tracked) = inner.searches.get_mut(request_hash) {
            tracked.info.id = Some(search_id.to_string());
        }
    }

    /// Mark a tracked search done; completes the session once every tracked
    /// search is done.
    pub fn track_complete(&self, session_id: &str, request_hash: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.session_id.as_deref() != Some(session_id) {
            return;
        }
        if let Some(tracked) = inner.searches.get_mut(request_hash) {
            tracked.info.status = SearchStatus::Done;
        }
        self.maybe_complete(&mut inner);
    }

    /// Mark a tracked search failed. The search stays in the registry as an
    /// anomaly; the session can no longer complete but is not forced into
    /// `Error` client-side.
    pub fn track_error(&self, session_id: &str, request_hash: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.session_id.as_deref() != Some(session_id) {
            return;
        }
        if let Some(tracked) = inner.searches.get_mut(request_hash) {
            tracked.info.status = SearchStatus::Error;
        }
    }

    /// Forget a tracked search (cancelled before settling).
    pub fn untrack(&self, session_id: &str, request_hash: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.session_id.as_deref() != Some(session_id) {
            return;
        }
        inner.searches.remove(request_hash);
    }

    /// A request timed out: the session leaves the running states without
    /// discarding the other in-flight searches.
    pub fn on_search_timeout(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.session_id.as_deref() != Some(session_id) {
            return;
        }
        if inner.state.is_active() {
            inner.state = SessionState::Expired;
            self.status_tx.send_replace(SessionState::Expired);
        }
    }

    /// Stored async search id for a request fingerprint (restore path).
    pub fn get_search_id(&self, session_id: &str, request_hash: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        if inner.session_id.as_deref() != Some(session_id) {
            return None;
        }
        inner
            .searches
            .get(request_hash)
            .and_then(|tracked| tracked.info.id.clone())
    }

    /// Abort every tracked search and mark the session cancelled.
    pub fn cancel(&self) {
        let aborts: Vec<CancellationToken> = {
            let mut inner = self.inner.lock().unwrap();
            if inner.session_id.is_none() {
                return;
            }
            inner.state = SessionState::Cancelled;
            self.status_tx.send_replace(SessionState::Cancelled);
            inner
                .searches
                .values()
                .map(|tracked| tracked.abort.clone())
                .collect()
        };
        for abort in aborts {
            abort.cancel();
        }
        info!("search session cancelled");
    }

    /// Persist the current session so its searches survive navigation away.
    ///
    /// The in-memory state flips to `BackgroundLoading` synchronously, before
    /// any storage I/O, so a search completing concurrently observes the new
    /// state and keeps its backend-side resources alive.
    pub async fn store(
        &self,
        name: &str,
        app_id: &str,
        initial_state: Value,
        restore_state: Value,
    ) -> Result<SessionAttributes> {
        let (session_id, attributes, first_save) = {
            let mut inner = self.inner.lock().unwrap();
            let session_id = match inner.session_id.clone() {
                Some(id) => id,
                None => bail!("no active search session to store"),
            };
            let first_save = inner.state != SessionState::BackgroundLoading;
            inner.state = SessionState::BackgroundLoading;
            self.status_tx.send_replace(SessionState::BackgroundLoading);

            let id_mapping: HashMap<String, TrackedSearchInfo> = inner
                .searches
                .iter()
                .map(|(hash, tracked)| (hash.clone(), tracked.info.clone()))
                .collect();
            let attributes = SessionAttributes {
                name: name.to_string(),
                app_id: app_id.to_string(),
                created: inner.created,
                expires: inner.created + self.expiry,
                status: SessionState::BackgroundLoading,
                error: None,
                initial_state,
                restore_state,
                id_mapping,
            };
            (session_id, attributes, first_save)
        };

        if first_save {
            self.store
                .create(&session_id, attributes.clone())
                .await
                .context("failed to persist search session")?;
        } else {
            self.store
                .update(&session_id, attributes.clone())
                .await
                .context("failed to update stored search session")?;
        }
        info!(session_id = %session_id, searches = attributes.id_mapping.len(), "search session saved to background");
        Ok(attributes)
    }

    fn maybe_complete(&self, inner: &mut SessionInner) {
        let all_done = !inner.searches.is_empty()
            && inner
                .searches
                .values()
                .all(|tracked| tracked.info.status == SearchStatus::Done);
        if all_done && inner.state.is_active() && inner.state != SessionState::New {
            inner.state = SessionState::Completed;
            self.status_tx.send_replace(SessionState::Completed);
        }
    }
}
