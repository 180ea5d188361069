//! Single-slot multicast plumbing for search responses.
//!
//! Every search publishes its responses into a `watch` channel: one slot,
//! latest value wins, replayed to late subscribers. That is exactly the
//! sharing model the response cache needs: a subscriber attaching after
//! three poll rounds sees the third response immediately and never an older
//! one.

use crate::search::errors::SearchError;
use crate::search::types::SearchResponse;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::DropGuard;

/// Slot content, from creation to settlement.
#[derive(Debug, Clone)]
pub(crate) enum SearchSlot {
    /// No response yet.
    Pending,
    /// Intermediate response; more will follow.
    Update(SearchResponse),
    /// Terminal outcome; the slot will not change again.
    Finished(Result<SearchResponse, SearchError>),
}

/// Writer half of a search's response slot, held by the driver task.
pub(crate) struct SlotWriter {
    tx: watch::Sender<SearchSlot>,
}

impl SlotWriter {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SearchSlot::Pending);
        Self { tx }
    }

    /// Publish an intermediate response.
    pub(crate) fn update(&self, response: SearchResponse) {
        // send_replace stores the value even with no receivers attached, so
        // subscribers arriving later still see it.
        self.tx.send_replace(SearchSlot::Update(response));
    }

    /// Publish the terminal outcome.
    pub(crate) fn finish(&self, outcome: Result<SearchResponse, SearchError>) {
        self.tx.send_replace(SearchSlot::Finished(outcome));
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SearchSlot> {
        self.tx.subscribe()
    }
}

/// Increments the process-wide in-flight counter on creation and decrements
/// it exactly once when dropped, no matter which way the search settled.
pub(crate) struct PendingGuard {
    tx: watch::Sender<usize>,
}

impl PendingGuard {
    pub(crate) fn new(tx: &watch::Sender<usize>) -> Self {
        tx.send_modify(|count| *count += 1);
        Self { tx: tx.clone() }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// The response sequence returned to a caller of `search()`.
///
/// Yields every response the slot publishes while this subscriber is
/// attached (slow subscribers skip straight to the latest), ending with the
/// terminal response or error. Dropping the stream before completion releases
/// the caller's interest: for an unshared search that cancels the underlying
/// poll; for a cached search the driver keeps running for other subscribers.
pub struct SearchStream {
    inner: WatchStream<SearchSlot>,
    done: bool,
    // Keeps a pre-settled slot alive for streams built via failed().
    _slot: Option<watch::Sender<SearchSlot>>,
    _pending: Option<PendingGuard>,
    _driver: Option<DropGuard>,
}

impl SearchStream {
    pub(crate) fn from_slot(
        rx: watch::Receiver<SearchSlot>,
        pending: Option<PendingGuard>,
        driver: Option<DropGuard>,
    ) -> Self {
        Self {
            inner: WatchStream::new(rx),
            done: false,
            _slot: None,
            _pending: pending,
            _driver: driver,
        }
    }

    /// A stream that fails immediately, with no work behind it.
    pub(crate) fn failed(err: SearchError) -> Self {
        let (tx, rx) = watch::channel(SearchSlot::Finished(Err(err)));
        Self {
            inner: WatchStream::new(rx),
            done: false,
            _slot: Some(tx),
            _pending: None,
            _driver: None,
        }
    }

    /// Drive the search to completion and return its terminal response.
    pub async fn last(mut self) -> Result<SearchResponse, SearchError> {
        use futures::StreamExt;
        let mut last = None;
        while let Some(item) = self.next().await {
            last = Some(item?);
        }
        last.ok_or_else(|| SearchError::Other("search ended without a response".into()))
    }
}

impl Stream for SearchStream {
    type Item = Result<SearchResponse, SearchError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(SearchSlot::Pending)) => continue,
                Poll::Ready(Some(SearchSlot::Update(response))) => {
                    return Poll::Ready(Some(Ok(response)));
                }
                Poll::Ready(Some(SearchSlot::Finished(outcome))) => {
                    this.done = true;
                    return Poll::Ready(Some(outcome));
                }
                // Driver dropped without settling (cancelled mid-flight).
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
