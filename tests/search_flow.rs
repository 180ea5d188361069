//! End-to-end flow tests: SearchCore over the HTTP backend.
//!
//! Run with: cargo test --test search_flow

use anyhow::Result;
use async_trait::async_trait;
use search_sessions::backend::HttpSearchBackend;
use search_sessions::search::{LogSink, SearchOptions, SearchRequest};
use search_sessions::session::{SessionAttributes, SessionState, SessionStore};
use search_sessions::{Config, SearchCore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Minimal in-memory session store for the flow tests.
#[derive(Default)]
struct MapSessionStore {
    records: RwLock<HashMap<String, SessionAttributes>>,
}

#[async_trait]
impl SessionStore for MapSessionStore {
    async fn create(&self, session_id: &str, attributes: SessionAttributes) -> Result<()> {
        self.records
            .write()
            .await
            .insert(session_id.to_string(), attributes);
        Ok(())
    }

    async fn update(&self, session_id: &str, attributes: SessionAttributes) -> Result<()> {
        self.create(session_id, attributes).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionAttributes>> {
        Ok(self.records.read().await.get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.records.write().await.remove(session_id);
        Ok(())
    }

    async fn find_by_status(
        &self,
        statuses: &[SessionState],
    ) -> Result<Vec<(String, SessionAttributes)>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|(_, attrs)| statuses.contains(&attrs.status))
            .map(|(id, attrs)| (id.clone(), attrs.clone()))
            .collect())
    }
}

fn core_for(server: &MockServer) -> (SearchCore, Arc<MapSessionStore>) {
    let config = Config {
        backend_url: server.uri(),
        // Keep the poll loop fast; these tests run on the real clock.
        poll_interval: Duration::from_millis(20),
        ..Config::from_yaml_and_env(Some(std::path::Path::new("/nonexistent"))).unwrap()
    };
    let store = Arc::new(MapSessionStore::default());
    let backend = Arc::new(HttpSearchBackend::new(&server.uri()).unwrap());
    let core = SearchCore::new(config, backend, store.clone(), Arc::new(LogSink));
    (core, store)
}

#[tokio::test]
async fn test_submit_poll_complete_flow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/search/async"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "search-1", "isRunning": true, "isPartial": true,
            "rawResponse": {}, "loaded": 1, "total": 5
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/internal/search/async/search-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "search-1", "isRunning": false, "isPartial": false,
            "rawResponse": {"hits": 7}
        })))
        .mount(&server)
        .await;
    // Completion triggers the best-effort backend-side delete.
    Mock::given(method("DELETE"))
        .and(path("/internal/search/async/search-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (core, _) = core_for(&server);
    let sid = core.session().start();

    let response = core
        .search(
            SearchRequest::new(json!({"index": "logs-*"})),
            SearchOptions {
                session_id: Some(sid),
                ..Default::default()
            },
        )
        .last()
        .await
        .unwrap();

    assert_eq!(response.raw_response["hits"], 7);
    assert_eq!(core.session().state(), SessionState::Completed);
    assert_eq!(*core.pending_count().borrow(), 0);
}

#[tokio::test]
async fn test_identical_session_searches_hit_backend_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/search/async"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "search-1", "isRunning": false, "isPartial": false,
            "rawResponse": {"hits": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/internal/search/async/search-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (core, _) = core_for(&server);
    let sid = core.session().start();
    let options = SearchOptions {
        session_id: Some(sid),
        ..Default::default()
    };
    let request = || SearchRequest::new(json!({"index": "logs-*"}));

    let first = core.search(request(), options.clone()).last().await.unwrap();
    let second = core.search(request(), options).last().await.unwrap();

    // The wiremock expectation (exactly one submit) verifies the dedupe on
    // drop; both callers saw the same terminal payload.
    assert_eq!(first.raw_response, second.raw_response);
}

#[tokio::test]
async fn test_stored_session_record_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/search/async"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "search-1", "isRunning": false, "isPartial": false, "rawResponse": {}
        })))
        .mount(&server)
        .await;

    let (core, store) = core_for(&server);
    let sid = core.session().start();
    core.search(
        SearchRequest::new(json!({"index": "logs-*"})),
        SearchOptions {
            session_id: Some(sid.clone()),
            ..Default::default()
        },
    )
    .last()
    .await
    .unwrap();

    core.session()
        .store("my session", "discover", json!({"q": "*"}), json!({"q": "*"}))
        .await
        .unwrap();

    let record = store.get(&sid).await.unwrap().unwrap();
    assert_eq!(record.name, "my session");
    assert_eq!(record.status, SessionState::BackgroundLoading);
    assert_eq!(record.id_mapping.len(), 1);
    let info = record.id_mapping.values().next().unwrap();
    assert_eq!(info.id.as_deref(), Some("search-1"));
}
