//! Periodic reconciliation of persisted sessions against the backend.
//!
//! Saved sessions outlive the client that created them; the backend alone
//! knows whether their searches are still running. This task sweeps every
//! record in `Running`/`BackgroundLoading`, asks the backend about each
//! tracked search, and repairs the record: everything done ⇒ `Completed`,
//! a search the backend errored on ⇒ `Error`, results the backend no longer
//! holds (or a record past its expiry) ⇒ `Expired`.

use crate::backend::{BackendError, SearchBackend};
use crate::session::store::SessionStore;
use crate::session::types::{SearchStatus, SessionAttributes, SessionState};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Settings for the monitoring sweep.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between sweeps.
    pub interval: Duration,
    /// When false the task refuses to run at all (sessions administratively
    /// disabled).
    pub enabled: bool,
}

/// Background task driving [`check_running_sessions`] on an interval.
pub struct MonitoringTask {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn SearchBackend>,
    config: MonitorConfig,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl MonitoringTask {
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn SearchBackend>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            backend,
            config,
            stop_tx: None,
        }
    }

    /// Start the sweep loop. When sessions are disabled the task removes
    /// itself instead of scheduling anything.
    pub fn start(&mut self) {
        if self.stop_tx.is_some() {
            return; // Already running
        }
        if !self.config.enabled {
            info!("search sessions are disabled, clearing monitoring task");
            return;
        }

        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        self.stop_tx = Some(stop_tx);

        let store = self.store.clone();
        let backend = self.backend.clone();
        let interval = self.config.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        info!("session monitoring task stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = check_running_sessions(&store, &backend).await {
                            warn!("session monitoring sweep failed: {:#}", e);
                        }
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "session monitoring task started");
    }

    /// Stop the sweep loop.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

/// One reconciliation sweep over every in-progress persisted session.
pub async fn check_running_sessions(
    store: &Arc<dyn SessionStore>,
    backend: &Arc<dyn SearchBackend>,
) -> Result<()> {
    let sessions = store
        .find_by_status(&[SessionState::Running, SessionState::BackgroundLoading])
        .await?;
    if sessions.is_empty() {
        return Ok(());
    }
    debug!(count = sessions.len(), "reconciling in-progress search sessions");

    for (session_id, mut attributes) in sessions {
        let repaired = reconcile_session(&session_id, &mut attributes, backend).await;
        if let Some(status) = repaired {
            attributes.status = status;
            info!(session_id = %session_id, status = ?status, "repairing stored search session");
            if let Err(e) = store.update(&session_id, attributes).await {
                warn!(session_id = %session_id, "failed to update stored session: {:#}", e);
            }
        }
    }
    Ok(())
}

/// Determine the repaired status for one session record, updating its
/// per-search statuses in place. Returns `None` when nothing changed.
async fn reconcile_session(
    session_id: &str,
    attributes: &mut SessionAttributes,
    backend: &Arc<dyn SearchBackend>,
) -> Option<SessionState> {
    if Utc::now() > attributes.expires {
        return Some(SessionState::Expired);
    }

    let mut changed = false;
    let mut expired = false;
    let never = CancellationToken::new();

    for (hash, info) in attributes.id_mapping.iter_mut() {
        if info.status != SearchStatus::Running {
            continue;
        }
        let Some(id) = info.id.clone() else { continue };

        match backend.poll(&info.strategy, &id, &never).await {
            Ok(response) if response.is_running => {}
            Ok(response) if response.is_partial => {
                info.status = SearchStatus::Error;
                changed = true;
            }
            Ok(_) => {
                info.status = SearchStatus::Done;
                changed = true;
            }
            // The backend has dropped the results entirely.
            Err(BackendError::Status { status: 404, .. }) => {
                expired = true;
                changed = true;
            }
            Err(e) => {
                warn!(session_id = %session_id, request_hash = %hash, "backend status check failed: {}", e);
                info.status = SearchStatus::Error;
                changed = true;
            }
        }
    }

    if !changed {
        return None;
    }
    if expired {
        return Some(SessionState::Expired);
    }
    if attributes
        .id_mapping
        .values()
        .any(|info| info.status == SearchStatus::Error)
    {
        attributes.error = Some("one or more searches failed".to_string());
        return Some(SessionState::Error);
    }
    if !attributes.id_mapping.is_empty()
        && attributes
            .id_mapping
            .values()
            .all(|info| info.status == SearchStatus::Done)
    {
        return Some(SessionState::Completed);
    }
    // Some searches settled but others are still running; persist the
    // per-search progress without changing the session status.
    Some(attributes.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockSearchBackend;
    use crate::session::store::mock::InMemorySessionStore;
    use crate::session::types::TrackedSearchInfo;
    use serde_json::json;
    use std::collections::HashMap;

    fn record(
        status: SessionState,
        searches: Vec<(&str, Option<&str>, SearchStatus)>,
        expires_in: chrono::Duration,
    ) -> SessionAttributes {
        let id_mapping: HashMap<String, TrackedSearchInfo> = searches
            .into_iter()
            .map(|(hash, id, status)| {
                (
                    hash.to_string(),
                    TrackedSearchInfo {
                        id: id.map(str::to_string),
                        strategy: "async".into(),
                        status,
                    },
                )
            })
            .collect();
        SessionAttributes {
            name: "s".into(),
            app_id: "discover".into(),
            created: Utc::now(),
            expires: Utc::now() + expires_in,
            status,
            error: None,
            initial_state: json!({}),
            restore_state: json!({}),
            id_mapping,
        }
    }

    async fn stores() -> (Arc<dyn SessionStore>, Arc<InMemorySessionStore>) {
        let concrete = Arc::new(InMemorySessionStore::new());
        (concrete.clone() as Arc<dyn SessionStore>, concrete)
    }

    #[tokio::test]
    async fn test_all_done_marks_completed() {
        let (store, concrete) = stores().await;
        let backend = Arc::new(MockSearchBackend::new());
        backend.push_complete("search-1");
        concrete
            .create(
                "s1",
                record(
                    SessionState::BackgroundLoading,
                    vec![("h1", Some("search-1"), SearchStatus::Running)],
                    chrono::Duration::days(7),
                ),
            )
            .await
            .unwrap();

        let backend_dyn: Arc<dyn SearchBackend> = backend.clone();
        check_running_sessions(&store, &backend_dyn).await.unwrap();

        let repaired = concrete.get("s1").await.unwrap().unwrap();
        assert_eq!(repaired.status, SessionState::Completed);
        assert_eq!(repaired.id_mapping["h1"].status, SearchStatus::Done);
    }

    #[tokio::test]
    async fn test_backend_failure_marks_error() {
        let (store, concrete) = stores().await;
        let backend = Arc::new(MockSearchBackend::new());
        backend.push_response(Err(BackendError::Status {
            status: 500,
            body: json!({"message": "shard failure"}),
        }));
        concrete
            .create(
                "s1",
                record(
                    SessionState::Running,
                    vec![("h1", Some("search-1"), SearchStatus::Running)],
                    chrono::Duration::days(7),
                ),
            )
            .await
            .unwrap();

        let backend_dyn: Arc<dyn SearchBackend> = backend.clone();
        check_running_sessions(&store, &backend_dyn).await.unwrap();

        let repaired = concrete.get("s1").await.unwrap().unwrap();
        assert_eq!(repaired.status, SessionState::Error);
        assert!(repaired.error.is_some());
    }

    #[tokio::test]
    async fn test_missing_search_marks_expired() {
        let (store, concrete) = stores().await;
        let backend = Arc::new(MockSearchBackend::new());
        backend.push_response(Err(BackendError::Status {
            status: 404,
            body: json!({}),
        }));
        concrete
            .create(
                "s1",
                record(
                    SessionState::BackgroundLoading,
                    vec![("h1", Some("search-1"), SearchStatus::Running)],
                    chrono::Duration::days(7),
                ),
            )
            .await
            .unwrap();

        let backend_dyn: Arc<dyn SearchBackend> = backend.clone();
        check_running_sessions(&store, &backend_dyn).await.unwrap();

        let repaired = concrete.get("s1").await.unwrap().unwrap();
        assert_eq!(repaired.status, SessionState::Expired);
    }

    #[tokio::test]
    async fn test_expired_record_skips_backend() {
        let (store, concrete) = stores().await;
        let backend = Arc::new(MockSearchBackend::new());
        concrete
            .create(
                "s1",
                record(
                    SessionState::Running,
                    vec![("h1", Some("search-1"), SearchStatus::Running)],
                    chrono::Duration::days(-1),
                ),
            )
            .await
            .unwrap();

        let backend_dyn: Arc<dyn SearchBackend> = backend.clone();
        check_running_sessions(&store, &backend_dyn).await.unwrap();

        let repaired = concrete.get("s1").await.unwrap().unwrap();
        assert_eq!(repaired.status, SessionState::Expired);
        assert_eq!(backend.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_still_running_persists_partial_progress() {
        let (store, concrete) = stores().await;
        let backend = Arc::new(MockSearchBackend::new());
        backend.push_complete("search-1");
        backend.push_running("search-2");
        concrete
            .create(
                "s1",
                record(
                    SessionState::Running,
                    vec![
                        ("h1", Some("search-1"), SearchStatus::Running),
                        ("h2", Some("search-2"), SearchStatus::Running),
                    ],
                    chrono::Duration::days(7),
                ),
            )
            .await
            .unwrap();

        let backend_dyn: Arc<dyn SearchBackend> = backend.clone();
        check_running_sessions(&store, &backend_dyn).await.unwrap();

        let repaired = concrete.get("s1").await.unwrap().unwrap();
        assert_eq!(repaired.status, SessionState::Running);
        let done = repaired
            .id_mapping
            .values()
            .filter(|info| info.status == SearchStatus::Done)
            .count();
        assert_eq!(done, 1);
    }

    #[tokio::test]
    async fn test_completed_sessions_not_swept() {
        let (store, concrete) = stores().await;
        let backend = Arc::new(MockSearchBackend::new());
        concrete
            .create(
                "s1",
                record(
                    SessionState::Completed,
                    vec![("h1", Some("search-1"), SearchStatus::Done)],
                    chrono::Duration::days(7),
                ),
            )
            .await
            .unwrap();

        let backend_dyn: Arc<dyn SearchBackend> = backend.clone();
        check_running_sessions(&store, &backend_dyn).await.unwrap();
        assert_eq!(backend.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_task_does_not_start() {
        let (store, _) = stores().await;
        let backend: Arc<dyn SearchBackend> = Arc::new(MockSearchBackend::new());
        let mut task = MonitoringTask::new(
            store,
            backend,
            MonitorConfig {
                interval: Duration::from_millis(10),
                enabled: false,
            },
        );
        task.start();
        assert!(task.stop_tx.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sweeps_on_interval() {
        let (store, concrete) = stores().await;
        let backend = Arc::new(MockSearchBackend::new());
        backend.push_complete("search-1");
        concrete
            .create(
                "s1",
                record(
                    SessionState::Running,
                    vec![("h1", Some("search-1"), SearchStatus::Running)],
                    chrono::Duration::days(7),
                ),
            )
            .await
            .unwrap();

        let backend_dyn: Arc<dyn SearchBackend> = backend.clone();
        let mut task = MonitoringTask::new(
            store,
            backend_dyn,
            MonitorConfig {
                interval: Duration::from_secs(10),
                enabled: true,
            },
        );
        task.start();

        // First tick fires immediately; give the spawned task a few turns.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let repaired = concrete.get("s1").await.unwrap().unwrap();
        assert_eq!(repaired.status, SessionState::Completed);
        task.stop().await;
    }
}
