//! Session and tracked-search state, including the persisted record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle state of a search session.
///
/// `Restored` is an alternate entry state: equivalent to `Running` but
/// flagged so callers know to re-attach stored searches instead of
/// submitting fresh ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    New,
    Running,
    BackgroundLoading,
    Completed,
    Cancelled,
    Expired,
    Error,
    Restored,
}

impl SessionState {
    /// States in which searches are still expected to make progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::New
                | SessionState::Running
                | SessionState::Restored
                | SessionState::BackgroundLoading
        )
    }
}

/// Status of one tracked search within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Running,
    Done,
    Error,
}

/// Per-search bookkeeping persisted in a session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedSearchInfo {
    /// Backend-assigned async search id, once known.
    pub id: Option<String>,
    /// Execution strategy the search was submitted with.
    pub strategy: String,
    pub status: SearchStatus,
}

/// The persisted shape of a saved session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAttributes {
    /// User-facing session name shown in session management.
    pub name: String,
    /// Application that created the session.
    pub app_id: String,
    pub created: DateTime<Utc>,
    /// Past this point the monitoring sweep marks the record `Expired`.
    pub expires: DateTime<Utc>,
    pub status: SessionState,
    /// Failure detail; set when `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Application state the session was created with (used to re-run an
    /// expired session from scratch).
    pub initial_state: Value,
    /// Application state to restore the session with (relative dates
    /// converted to absolute, and similar).
    pub restore_state: Value,
    /// Request fingerprint → tracked-search bookkeeping.
    pub id_mapping: HashMap<String, TrackedSearchInfo>,
}
