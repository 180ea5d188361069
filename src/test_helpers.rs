//! Test helper factories and mock-wired builders
//!
//! Provides convenience functions for creating test objects with sensible
//! defaults, and helpers for building a SearchCore backed entirely by
//! in-memory mocks.
#![allow(dead_code)]

use crate::backend::mock::MockSearchBackend;
use crate::search::notify::mock::RecordingSink;
use crate::search::types::SearchResponse;
use crate::session::store::mock::InMemorySessionStore;
use crate::{Config, SearchCore};
use std::sync::Arc;
use std::time::Duration;

/// A config with defaults suitable for fast tests.
pub fn test_config() -> Config {
    Config {
        backend_url: "http://mock:5601".to_string(),
        search_timeout: Duration::from_secs(600),
        poll_interval: Duration::from_millis(1000),
        cache_max_items: 50,
        cache_max_size_mb: 10,
        timeout_mode: crate::search::TimeoutMode::Contact,
        notification_window: Duration::from_secs(30),
        sessions_enabled: true,
        monitor_interval: Duration::from_secs(10),
        session_expiry_days: 7,
    }
}

/// A SearchCore wired to in-memory mocks, plus handles to the mocks that
/// tests assert against.
pub fn mock_core() -> (SearchCore, Arc<MockSearchBackend>, Arc<RecordingSink>) {
    let backend = Arc::new(MockSearchBackend::new());
    let sink = Arc::new(RecordingSink::new());
    let core = SearchCore::new(
        test_config(),
        backend.clone(),
        Arc::new(InMemorySessionStore::new()),
        sink.clone(),
    );
    (core, backend, sink)
}

/// A running (non-terminal) response carrying `id`.
pub fn running_response(id: &str) -> SearchResponse {
    SearchResponse {
        id: Some(id.to_string()),
        is_running: true,
        is_partial: true,
        ..Default::default()
    }
}

/// A terminal complete response carrying `id`.
pub fn complete_response(id: &str) -> SearchResponse {
    SearchResponse {
        id: Some(id.to_string()),
        ..Default::default()
    }
}
