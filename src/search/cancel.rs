//! Cancellation-signal combination.
//!
//! A search can be aborted by any of: the interceptor-wide cancel-all token,
//! the per-request timeout, or a caller-supplied token. [`combine_signals`]
//! merges them into one derived token that fires the instant any source
//! fires, and only once. The watcher and timer tasks it spawns are purely
//! event-driven and are torn down when the derived token fires or when the
//! returned [`SignalSetup`] is dropped, whichever comes first.

use futures::future::select_all;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Combined cancellation for one search invocation.
pub struct SignalSetup {
    /// Fires when any source fires (or when [`SignalSetup::abort`] is
    /// called).
    pub combined: CancellationToken,
    /// The timeout component, so the error classifier can distinguish a
    /// timeout from a user abort after the fact.
    pub timeout: CancellationToken,
    _teardown: DropGuard,
}

impl SignalSetup {
    /// Manually abort the combined signal (session-level cancel path).
    pub fn abort(&self) {
        self.combined.cancel();
    }
}

/// Merge the given cancellation sources, plus an optional timeout, into one
/// derived token.
///
/// The timeout timer starts immediately; it is one input into the combined
/// token like any other source, and it is cancelled together with the
/// watcher when the setup is dropped, regardless of which signal actually
/// fired.
pub fn combine_signals(
    sources: Vec<CancellationToken>,
    timeout_after: Option<Duration>,
) -> SignalSetup {
    let combined = CancellationToken::new();
    let timeout = CancellationToken::new();
    let stop = CancellationToken::new();

    if let Some(after) = timeout_after {
        let timeout = timeout.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => timeout.cancel(),
                _ = stop.cancelled() => {}
            }
        });
    }

    let waits: Vec<_> = sources
        .iter()
        .chain(std::iter::once(&timeout))
        .map(|token| Box::pin(token.clone().cancelled_owned()))
        .collect();

    {
        let combined = combined.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = select_all(waits) => combined.cancel(),
                // Fired manually via abort(), or the owning operation
                // finalized: either way there is nothing left to watch.
                _ = combined.cancelled() => {}
                _ = stop.cancelled() => {}
            }
        });
    }

    SignalSetup {
        combined,
        timeout,
        _teardown: stop.drop_guard(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_any_source_fires_combined() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let setup = combine_signals(vec![a.clone(), b.clone()], None);
        assert!(!setup.combined.is_cancelled());

        b.cancel();
        setup.combined.cancelled().await;
        assert!(setup.combined.is_cancelled());
        assert!(!setup.timeout.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_combined_and_timeout_component() {
        let caller = CancellationToken::new();
        let setup = combine_signals(vec![caller], Some(Duration::from_millis(100)));

        setup.combined.cancelled().await;
        assert!(setup.timeout.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_tears_down_timer() {
        let caller = CancellationToken::new();
        let setup = combine_signals(vec![caller], Some(Duration::from_secs(60)));
        let combined = setup.combined.clone();
        let timeout = setup.timeout.clone();
        drop(setup);

        // The timer task is gone; even well past the deadline nothing fires.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!combined.is_cancelled());
        assert!(!timeout.is_cancelled());
    }

    #[tokio::test]
    async fn test_manual_abort() {
        let setup = combine_signals(vec![CancellationToken::new()], None);
        setup.abort();
        setup.combined.cancelled().await;
        assert!(!setup.timeout.is_cancelled());
    }

    #[tokio::test]
    async fn test_source_fired_before_combining() {
        let already = CancellationToken::new();
        already.cancel();
        let setup = combine_signals(vec![already], None);
        setup.combined.cancelled().await;
    }
}
