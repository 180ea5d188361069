//! Search session lifecycle: grouping searches, background save, restore,
//! and server-side reconciliation of persisted sessions.

pub mod monitor;
pub mod service;
pub mod store;
pub mod types;

pub use monitor::{check_running_sessions, MonitorConfig, MonitoringTask};
pub use service::SessionService;
pub use store::SessionStore;
pub use types::{SearchStatus, SessionAttributes, SessionState, TrackedSearchInfo};
