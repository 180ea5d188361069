//! Generic submit-once / poll-until-done driver.
//!
//! [`poll_search`] turns an async probe (submit on the first call, poll by id
//! afterwards; the caller's closure decides) into a sequence of responses
//! ending in either a terminal success or an error. Each call produces a
//! fresh poll sequence; sharing one in-flight poll between identical requests
//! is the response cache's job, not this layer's.

use crate::search::errors::SearchError;
use crate::search::types::SearchResponse;
use futures::stream::{self, Stream};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options recognized by [`poll_search`].
pub struct PollConfig {
    /// Delay between poll attempts. The first probe runs immediately.
    pub poll_interval: Duration,
    /// External cancellation; short-circuits the sequence with
    /// [`SearchError::Cancelled`] without waiting out the interval.
    pub abort: CancellationToken,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            abort: CancellationToken::new(),
        }
    }
}

/// A finalizer that runs exactly once, no matter how the owning poll sequence
/// exits: natural completion, failure, or the sequence being dropped before
/// it finishes. Invoking [`fire`](CancelOnce::fire) after the first time is a
/// no-op.
pub struct CancelOnce {
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CancelOnce {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    /// A finalizer that does nothing; useful where cleanup is handled
    /// elsewhere.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Run the finalizer if it has not run yet.
    pub fn fire(&self) {
        // Take under the lock, invoke outside it.
        let callback = self.callback.lock().unwrap().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Drop for CancelOnce {
    fn drop(&mut self) {
        self.fire();
    }
}

enum Step {
    Probe,
    Sleep,
    Done,
}

struct PollState<P> {
    probe: P,
    step: Step,
    cancel: CancelOnce,
    config: PollConfig,
}

/// Drive `probe` until it yields a terminal response.
///
/// The returned stream emits every intermediate response, then one of:
/// - the terminal response (`is_running == false`, complete), ending the
///   stream;
/// - `Err(TimedOutOrPartial)` when the terminal response is partial;
/// - `Err(Cancelled)` when `config.abort` fires;
/// - the probe's own error, passed through.
///
/// `on_cancel` fires exactly once on every exit path, including the stream
/// being dropped mid-poll.
pub fn poll_search<P, Fut>(
    probe: P,
    on_cancel: CancelOnce,
    config: PollConfig,
) -> impl Stream<Item = Result<SearchResponse, SearchError>> + Send
where
    P: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<SearchResponse, SearchError>> + Send,
{
    let state = PollState {
        probe,
        step: Step::Probe,
        cancel: on_cancel,
        config,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match state.step {
                Step::Done => return None,
                Step::Sleep => {
                    tokio::select! {
                        _ = state.config.abort.cancelled() => {
                            state.cancel.fire();
                            state.step = Step::Done;
                            return Some((Err(SearchError::Cancelled), state));
                        }
                        _ = tokio::time::sleep(state.config.poll_interval) => {
                            state.step = Step::Probe;
                        }
                    }
                }
                Step::Probe => {
                    if state.config.abort.is_cancelled() {
                        state.cancel.fire();
                        state.step = Step::Done;
                        return Some((Err(SearchError::Cancelled), state));
                    }

                    let attempt = (state.probe)();
                    tokio::pin!(attempt);
                    let abort = state.config.abort.clone();
                    let result = tokio::select! {
                        _ = abort.cancelled() => {
                            state.cancel.fire();
                            state.step = Step::Done;
                            return Some((Err(SearchError::Cancelled), state));
                        }
                        result = &mut attempt => result,
                    };

                    match result {
                        Err(err) => {
                            state.cancel.fire();
                            state.step = Step::Done;
                            return Some((Err(err), state));
                        }
                        Ok(response) if response.is_running => {
                            state.step = Step::Sleep;
                            return Some((Ok(response), state));
                        }
                        // Terminal but incomplete: the backend gave up.
                        Ok(response) if response.is_partial => {
                            state.cancel.fire();
                            state.step = Step::Done;
                            return Some((Err(SearchError::TimedOutOrPartial), state));
                        }
                        Ok(response) => {
                            state.cancel.fire();
                            state.step = Step::Done;
                            return Some((Ok(response), state));
                        }
                    }
                }
            }
        }
    })
}
