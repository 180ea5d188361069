//! Scripted in-memory backend for testing without a real query engine.

use super::traits::{BackendError, SearchBackend};
use crate::search::types::SearchResponse;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backend whose responses are scripted up front.
///
/// `submit` and `poll` pop from one shared queue, in order; once the queue is
/// empty every call returns a terminal complete response. Call counts and
/// issued deletes are recorded for assertions.
pub struct MockSearchBackend {
    responses: Mutex<VecDeque<Result<SearchResponse, BackendError>>>,
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
    deletes: Mutex<Vec<(String, String)>>,
    /// Artificial latency before answering, so tests can observe in-flight
    /// state.
    delay: Option<Duration>,
}

impl MockSearchBackend {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            deletes: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue the next response (shared between submit and poll).
    pub fn push_response(&self, response: Result<SearchResponse, BackendError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Queue a running (non-terminal) response carrying `id`.
    pub fn push_running(&self, id: &str) {
        self.push_response(Ok(SearchResponse {
            id: Some(id.to_string()),
            is_running: true,
            is_partial: true,
            ..Default::default()
        }));
    }

    /// Queue a terminal complete response carrying `id`.
    pub fn push_complete(&self, id: &str) {
        self.push_response(Ok(SearchResponse {
            id: Some(id.to_string()),
            raw_response: serde_json::json!({"hits": 42}),
            ..Default::default()
        }));
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    async fn next_response(
        &self,
        abort: &CancellationToken,
    ) -> Result<SearchResponse, BackendError> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = abort.cancelled() => return Err(BackendError::Aborted),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if abort.is_cancelled() {
            return Err(BackendError::Aborted);
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(SearchResponse {
                    id: Some("mock-search".into()),
                    ..Default::default()
                })
            })
    }
}

impl Default for MockSearchBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchBackend for MockSearchBackend {
    async fn submit(
        &self,
        _strategy: &str,
        _params: &Value,
        abort: &CancellationToken,
    ) -> Result<SearchResponse, BackendError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.next_response(abort).await
    }

    async fn poll(
        &self,
        _strategy: &str,
        _id: &str,
        abort: &CancellationToken,
    ) -> Result<SearchResponse, BackendError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.next_response(abort).await
    }

    async fn delete(&self, strategy: &str, id: &str) -> Result<(), BackendError> {
        self.deletes
            .lock()
            .unwrap()
            .push((strategy.to_string(), id.to_string()));
        Ok(())
    }
}
