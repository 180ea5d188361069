//! Error taxonomy and one-shot classification.
//!
//! Classification happens exactly once, at the boundary between the polling
//! engine / transport and the caller (inside the interceptor). Everything the
//! caller receives is a [`SearchError`]; the variants decide what, if
//! anything, is shown to the user:
//! - `Cancelled` is never surfaced
//! - `Timeout` is surfaced at most once per cool-down window
//! - `Script` gets a dedicated message, everything else a generic one

use crate::backend::BackendError;
use serde_json::Value;
use thiserror::Error;

/// What the deployment can do about a timed-out search; selects the
/// user-facing timeout message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutMode {
    /// The installation tier enforces the limit; upgrading lifts it.
    Upgrade,
    /// The caller cannot change the limit; an administrator can.
    Contact,
    /// The caller can raise the configured search timeout themselves.
    Change,
}

impl TimeoutMode {
    /// User-facing explanation for a timed-out search.
    pub fn message(&self) -> &'static str {
        match self {
            TimeoutMode::Upgrade => {
                "One or more searches timed out. Upgrade your installation tier to run longer searches."
            }
            TimeoutMode::Contact => {
                "One or more searches timed out. Contact your administrator to increase the run time."
            }
            TimeoutMode::Change => {
                "One or more searches timed out. Increase the run time with the search timeout setting."
            }
        }
    }
}

/// Classified search failure, as delivered on a search's response stream.
///
/// Cloneable so the cache's single-slot channel can replay a terminal error
/// to late subscribers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// Caller- or shutdown-initiated cancellation. Propagated as-is, never
    /// shown to the user.
    #[error("search was cancelled")]
    Cancelled,

    /// The request exceeded the configured search timeout.
    #[error("{}", .mode.message())]
    Timeout {
        /// Capability of the caller, selects the remediation message.
        mode: TimeoutMode,
    },

    /// The backend reported a scripting-engine failure while running the
    /// search.
    #[error("search script failed: {reason}")]
    Script {
        /// Reason string extracted from the backend error body.
        reason: String,
    },

    /// The polling predicate observed a terminal-but-partial response: the
    /// backend gave up without a transport-level error.
    #[error("search ended with incomplete results")]
    TimedOutOrPartial,

    /// Structured backend failure with no recognized shape.
    #[error("backend returned status {status}: {message}")]
    Backend {
        /// HTTP-like status code reported by the backend.
        status: u16,
        /// Backend-provided failure text.
        message: String,
    },

    /// Anything else (transport failures, malformed responses). Passed
    /// through unchanged.
    #[error("{0}")]
    Other(String),
}

impl From<BackendError> for SearchError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Aborted => SearchError::Cancelled,
            BackendError::Status { status, body } => match script_error_reason(&body) {
                Some(reason) => SearchError::Script { reason },
                None => SearchError::Backend {
                    status,
                    message: error_message(&body),
                },
            },
            BackendError::Network(msg) => SearchError::Other(msg),
        }
    }
}

/// Extract the scripting-engine failure reason from a backend error body, if
/// the body has the recognized shape.
///
/// Handles both the bare engine shape and the shape re-wrapped by an HTTP
/// gateway under an `attributes` key:
/// `{"error":{"root_cause":[{"type":"script_exception","reason":"..."}]}}`.
fn script_error_reason(body: &Value) -> Option<String> {
    let error = body
        .get("attributes")
        .and_then(|a| a.get("error"))
        .or_else(|| body.get("error"))?;

    let root_cause = error.get("root_cause")?.as_array()?;
    let script = root_cause
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some("script_exception"))?;

    let reason = script
        .get("reason")
        .and_then(Value::as_str)
        .or_else(|| error.get("reason").and_then(Value::as_str))
        .unwrap_or("script execution failed");
    Some(reason.to_string())
}

/// Best-effort failure text from an arbitrary backend error body.
fn error_message(body: &Value) -> String {
    body.get("message")
        .or_else(|| body.get("error").and_then(|e| e.get("reason")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aborted_maps_to_cancelled() {
        let err = SearchError::from(BackendError::Aborted);
        assert_eq!(err, SearchError::Cancelled);
    }

    #[test]
    fn test_script_exception_recognized() {
        let body = json!({
            "error": {
                "root_cause": [
                    {"type": "script_exception", "reason": "compile error on line 2"}
                ],
                "reason": "search_phase_execution_exception"
            }
        });
        let err = SearchError::from(BackendError::Status { status: 400, body });
        assert_eq!(
            err,
            SearchError::Script {
                reason: "compile error on line 2".into()
            }
        );
    }

    #[test]
    fn test_script_exception_under_attributes() {
        let body = json!({
            "statusCode": 400,
            "attributes": {
                "error": {
                    "root_cause": [{"type": "script_exception", "reason": "bad painless"}]
                }
            }
        });
        let err = SearchError::from(BackendError::Status { status: 400, body });
        assert!(matches!(err, SearchError::Script { reason } if reason == "bad painless"));
    }

    #[test]
    fn test_unrecognized_status_passes_through() {
        let body = json!({"message": "shard failure"});
        let err = SearchError::from(BackendError::Status { status: 500, body });
        assert_eq!(
            err,
            SearchError::Backend {
                status: 500,
                message: "shard failure".into()
            }
        );
    }

    #[test]
    fn test_network_maps_to_other() {
        let err = SearchError::from(BackendError::Network("connection refused".into()));
        assert_eq!(err, SearchError::Other("connection refused".into()));
    }

    #[test]
    fn test_timeout_messages_differ_per_mode() {
        let msgs: Vec<_> = [TimeoutMode::Upgrade, TimeoutMode::Contact, TimeoutMode::Change]
            .iter()
            .map(|m| m.message())
            .collect();
        assert_ne!(msgs[0], msgs[1]);
        assert_ne!(msgs[1], msgs[2]);
    }
}
