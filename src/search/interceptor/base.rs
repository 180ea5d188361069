//! Minimal interceptor: one submit, one response.
//!
//! Suits synchronous strategies where the backend blocks until the search is
//! done. Carries all the cross-cutting machinery the session-aware decorator
//! reuses: combined cancellation with a per-request timeout, pending-count
//! bookkeeping, and error classification.

use super::{ErrorClassifier, SearchConfig, SearchInterceptor};
use crate::backend::SearchBackend;
use crate::search::cancel::{combine_signals, SignalSetup};
use crate::search::errors::SearchError;
use crate::search::notify::NotificationSink;
use crate::search::stream::{PendingGuard, SearchStream, SlotWriter};
use crate::search::types::{SearchOptions, SearchRequest, SYNC_SEARCH_STRATEGY};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub struct BaseSearchInterceptor {
    pub(crate) backend: Arc<dyn SearchBackend>,
    pub(crate) classifier: Arc<ErrorClassifier>,
    pub(crate) config: SearchConfig,
    cancel_all: Mutex<CancellationToken>,
    pending_tx: watch::Sender<usize>,
}

impl BaseSearchInterceptor {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        sink: Arc<dyn NotificationSink>,
        config: SearchConfig,
    ) -> Self {
        let classifier = Arc::new(ErrorClassifier::new(
            sink,
            config.timeout_mode,
            config.notification_window,
        ));
        let (pending_tx, _) = watch::channel(0usize);
        Self {
            backend,
            classifier,
            config,
            cancel_all: Mutex::new(CancellationToken::new()),
            pending_tx,
        }
    }

    /// Combined cancellation for one search: cancel-all + per-request
    /// timeout + the caller's token.
    pub(crate) fn signals_for(&self, caller: Option<CancellationToken>) -> SignalSetup {
        let mut sources = vec![self.cancel_all.lock().unwrap().clone()];
        sources.extend(caller);
        combine_signals(sources, Some(self.config.timeout))
    }

    /// Count a search as in flight until the returned guard drops.
    pub(crate) fn begin_pending(&self) -> PendingGuard {
        PendingGuard::new(&self.pending_tx)
    }

    fn swap_cancel_all(&self) -> CancellationToken {
        let mut current = self.cancel_all.lock().unwrap();
        std::mem::replace(&mut *current, CancellationToken::new())
    }
}

impl SearchInterceptor for BaseSearchInterceptor {
    fn search(&self, request: SearchRequest, options: SearchOptions) -> SearchStream {
        if options.abort.as_ref().is_some_and(|t| t.is_cancelled()) {
            return SearchStream::failed(SearchError::Cancelled);
        }

        let strategy = options
            .strategy
            .or(request.strategy)
            .unwrap_or_else(|| SYNC_SEARCH_STRATEGY.to_string());
        let signals = self.signals_for(options.abort);
        let pending = self.begin_pending();

        let writer = SlotWriter::new();
        let subscriber = writer.subscribe();
        let stop = CancellationToken::new();
        let stream_guard = stop.clone().drop_guard();

        let backend = self.backend.clone();
        let classifier = self.classifier.clone();
        let params = request.params;

        tokio::spawn(async move {
            // The whole SignalSetup must outlive the driver: its teardown
            // guard is what keeps the timeout/watcher tasks alive. The 2021
            // closure otherwise captures only the token fields touched below,
            // dropping the guard here and tearing those tasks down at once —
            // so force `signals` to be captured whole.
            let _signals = &signals;
            let drive = async {
                let outcome = backend
                    .submit(&strategy, &params, &signals.combined)
                    .await
                    .map_err(SearchError::from)
                    .map_err(|err| classifier.classify(err, &signals.timeout));
                writer.finish(outcome);
            };
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = drive => {}
            }
        });

        SearchStream::from_slot(subscriber, Some(pending), Some(stream_guard))
    }

    fn cancel_pending(&self) {
        self.swap_cancel_all().cancel();
    }

    fn pending_count(&self) -> watch::Receiver<usize> {
        self.pending_tx.subscribe()
    }

    fn stop(&self) {
        self.cancel_pending();
    }
}
