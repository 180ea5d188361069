//! Session-aware interceptor: polling, request hashing, response caching,
//! and session registration layered over [`BaseSearchInterceptor`].
//!
//! Per search invocation: fast-fail on a pre-aborted caller token, combine
//! cancellation signals, count the search as pending, fingerprint the
//! request, then either replay a cached slot or spawn one driver task that
//! polls the backend and publishes into a fresh slot shared through the
//! cache. On finalize the backend-side async search is deleted, unless the
//! owning session was saved to background while the search was in flight.

use super::base::BaseSearchInterceptor;
use super::{ErrorClassifier, SearchConfig, SearchInterceptor};
use crate::backend::SearchBackend;
use crate::search::cache::ResponseCache;
use crate::search::cancel::SignalSetup;
use crate::search::errors::SearchError;
use crate::search::hash::create_request_hash;
use crate::search::notify::NotificationSink;
use crate::search::poll::{poll_search, CancelOnce, PollConfig};
use crate::search::stream::{SearchStream, SlotWriter};
use crate::search::types::{SearchOptions, SearchRequest, ASYNC_SEARCH_STRATEGY};
use crate::session::{SessionService, SessionState};
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct SessionSearchInterceptor {
    base: BaseSearchInterceptor,
    session: Arc<SessionService>,
    cache: Arc<ResponseCache>,
}

impl SessionSearchInterceptor {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        session: Arc<SessionService>,
        sink: Arc<dyn NotificationSink>,
        config: SearchConfig,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(
            config.cache_max_items,
            config.cache_max_size_mb,
        ));
        Self {
            base: BaseSearchInterceptor::new(backend, sink, config),
            session,
            cache,
        }
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

impl SearchInterceptor for SessionSearchInterceptor {
    fn search(&self, mut request: SearchRequest, options: SearchOptions) -> SearchStream {
        if options.abort.as_ref().is_some_and(|t| t.is_cancelled()) {
            return SearchStream::failed(SearchError::Cancelled);
        }

        let strategy = options
            .strategy
            .clone()
            .or_else(|| request.strategy.clone())
            .unwrap_or_else(|| ASYNC_SEARCH_STRATEGY.to_string());
        let signals = self.base.signals_for(options.abort.clone());
        let pending = self.base.begin_pending();

        // Session hooks fire only for requests meaningful to track: a body,
        // and a session that is still the current one.
        let session_id = options
            .session_id
            .clone()
            .filter(|sid| !request.params.is_null() && self.session.is_current(sid));
        let request_hash = session_id
            .as_ref()
            .map(|sid| create_request_hash(&request.params, sid));

        // Restored sessions re-attach to the stored async search.
        if options.is_restore && request.id.is_none() {
            if let (Some(sid), Some(hash)) = (&session_id, &request_hash) {
                request.id = self.session.get_search_id(sid, hash);
            }
        }

        let cache_key = if self
            .session
            .should_cache_on_client(options.session_id.as_deref())
        {
            request_hash.clone()
        } else {
            None
        };

        if let Some(key) = &cache_key {
            if let Some(slot) = self.cache.get(key) {
                debug!(key = %key, "search served from response cache");
                return SearchStream::from_slot(slot, Some(pending), None);
            }
        }

        if let (Some(sid), Some(hash)) = (&session_id, &request_hash) {
            self.session
                .track_search(sid, hash, &strategy, signals.combined.clone());
        }

        let writer = SlotWriter::new();
        let subscriber = writer.subscribe();
        if let Some(key) = &cache_key {
            self.cache.set(key.clone(), writer.subscribe());
        }

        // An uncached search dies with its only subscriber; a cached one is
        // kept alive by the cache for concurrent and future subscribers.
        let (stop, stream_guard) = if cache_key.is_some() {
            (None, None)
        } else {
            let stop = CancellationToken::new();
            (Some(stop.clone()), Some(stop.drop_guard()))
        };

        let driver = SearchDriver {
            backend: self.base.backend.clone(),
            session: self.session.clone(),
            classifier: self.base.classifier.clone(),
            cache: self.cache.clone(),
            cache_key,
            session_id,
            request_hash,
            strategy,
            params: request.params,
            initial_id: request.id,
            writer,
            signals,
            poll_interval: self.base.config.poll_interval,
        };
        tokio::spawn(async move {
            match stop {
                Some(stop) => {
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        _ = driver.run() => {}
                    }
                }
                None => driver.run().await,
            }
        });

        SearchStream::from_slot(subscriber, Some(pending), stream_guard)
    }

    fn cancel_pending(&self) {
        self.base.cancel_pending();
    }

    fn pending_count(&self) -> watch::Receiver<usize> {
        self.base.pending_count()
    }

    fn stop(&self) {
        self.cache.clear();
        self.base.cancel_pending();
    }
}

/// State moved into the spawned task that drives one search to completion.
struct SearchDriver {
    backend: Arc<dyn SearchBackend>,
    session: Arc<SessionService>,
    classifier: Arc<ErrorClassifier>,
    cache: Arc<ResponseCache>,
    cache_key: Option<String>,
    session_id: Option<String>,
    request_hash: Option<String>,
    strategy: String,
    params: Value,
    initial_id: Option<String>,
    writer: SlotWriter,
    signals: SignalSetup,
    poll_interval: Duration,
}

impl SearchDriver {
    async fn run(self) {
        let SearchDriver {
            backend,
            session,
            classifier,
            cache,
            cache_key,
            session_id,
            request_hash,
            strategy,
            params,
            initial_id,
            writer,
            signals,
            poll_interval,
        } = self;

        let search_id = Arc::new(Mutex::new(initial_id));
        let saved_to_background = Arc::new(AtomicBool::new(false));

        // Latch the background-save transition while this search is in
        // flight, so the finalizer below still skips deletion after the
        // session stops being current.
        let latch_stop = CancellationToken::new();
        let _latch_guard = latch_stop.clone().drop_guard();
        if let Some(sid) = session_id.clone() {
            let mut status = session.status_stream();
            let session = session.clone();
            let flag = saved_to_background.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = latch_stop.cancelled() => break,
                        changed = status.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let state = *status.borrow_and_update();
                            if state == SessionState::BackgroundLoading && session.is_current(&sid) {
                                flag.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
            });
        }

        // Finalizer: release the backend-side async search, unless the
        // owning session was saved to background in the interim.
        let cancel = {
            let backend = backend.clone();
            let session = session.clone();
            let session_id = session_id.clone();
            let strategy = strategy.clone();
            let search_id = search_id.clone();
            let saved = saved_to_background.clone();
            CancelOnce::new(move || {
                let id = search_id.lock().unwrap().clone();
                let Some(id) = id else { return };
                let stored = saved.load(Ordering::SeqCst)
                    || session_id
                        .as_deref()
                        .map(|sid| session.is_stored(sid))
                        .unwrap_or(false);
                if stored {
                    debug!(search_id = %id, "session saved to background, keeping async search");
                    return;
                }
                // The finalizer can run from a Drop during runtime shutdown,
                // where there is no executor left to hand the delete to.
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    return;
                };
                handle.spawn(async move {
                    if let Err(e) = backend.delete(&strategy, &id).await {
                        debug!(search_id = %id, "failed to delete async search: {}", e);
                    }
                });
            })
        };

        let probe = {
            let backend = backend.clone();
            let strategy = strategy.clone();
            let combined = signals.combined.clone();
            let search_id = search_id.clone();
            move || {
                let backend = backend.clone();
                let strategy = strategy.clone();
                let combined = combined.clone();
                let search_id = search_id.clone();
                let params = params.clone();
                async move {
                    let known = search_id.lock().unwrap().clone();
                    let result = match known {
                        Some(id) => backend.poll(&strategy, &id, &combined).await,
                        None => backend.submit(&strategy, &params, &combined).await,
                    };
                    result.map_err(SearchError::from)
                }
            }
        };

        let responses = poll_search(
            probe,
            cancel,
            PollConfig {
                poll_interval,
                abort: signals.combined.clone(),
            },
        );
        tokio::pin!(responses);

        while let Some(item) = responses.next().await {
            match item {
                Ok(response) => {
                    if let Some(id) = &response.id {
                        let newly_assigned = {
                            let mut slot = search_id.lock().unwrap();
                            if slot.as_deref() != Some(id.as_str()) {
                                *slot = Some(id.clone());
                                true
                            } else {
                                false
                            }
                        };
                        if newly_assigned {
                            if let (Some(sid), Some(hash)) = (&session_id, &request_hash) {
                                session.track_search_id(sid, hash, id);
                            }
                        }
                    }

                    if let Some(key) = &cache_key {
                        let size = serde_json::to_string(&response)
                            .map(|s| s.len())
                            .unwrap_or(0);
                        cache.on_response(key, size);
                    }

                    if response.is_running {
                        writer.update(response);
                    } else {
                        if let (Some(sid), Some(hash)) = (&session_id, &request_hash) {
                            session.track_complete(sid, hash);
                        }
                        writer.finish(Ok(response));
                    }
                }
                Err(err) => {
                    let classified = classifier.classify(err, &signals.timeout);
                    if let (Some(sid), Some(hash)) = (&session_id, &request_hash) {
                        match &classified {
                            SearchError::Timeout { .. } => session.on_search_timeout(sid),
                            SearchError::Cancelled => session.untrack(sid, hash),
                            _ => session.track_error(sid, hash),
                        }
                    }
                    writer.finish(Err(classified));
                }
            }
        }
        // signals (and with them the timeout timer and the combined-token
        // watcher) are torn down here, whichever way the loop exited.
    }
}
