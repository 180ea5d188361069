//! User-notification seam and the timeout-toast gate.
//!
//! The core never renders UI; it hands classified failures to a
//! [`NotificationSink`] collaborator. Fire-and-forget: nothing in the search
//! path ever blocks on, or reads a result from, a notification.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// UI notification collaborator.
pub trait NotificationSink: Send + Sync {
    fn show_error(&self, title: &str, body: &str);
    fn show_warning(&self, title: &str, body: &str);
}

/// Default sink: routes notifications to the log.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn show_error(&self, title: &str, body: &str) {
        warn!(title, "{}", body);
    }

    fn show_warning(&self, title: &str, body: &str) {
        warn!(title, "{}", body);
    }
}

/// Cool-down gate: at most one notification per error kind per window.
///
/// A burst of concurrent timeouts produces a single toast; the next one is
/// allowed only once the window has elapsed. State is one last-shown
/// timestamp per kind, mutated in a single synchronous step.
pub struct NotificationGate {
    window: Duration,
    last_shown: Mutex<HashMap<&'static str, Instant>>,
}

impl NotificationGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_shown: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if a notification of this kind may be shown now, and if
    /// so records the showing.
    pub fn should_show(&self, kind: &'static str) -> bool {
        let mut last_shown = self.last_shown.lock().unwrap();
        let now = Instant::now();
        match last_shown.get(kind) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                last_shown.insert(kind, now);
                true
            }
        }
    }
}
