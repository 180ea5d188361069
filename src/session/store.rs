//! Trait abstraction for persisted-session storage.

use super::types::{SessionAttributes, SessionState};
use anyhow::Result;
use async_trait::async_trait;

/// Durable key/value store for saved sessions, keyed by session id.
///
/// The storage technology is a deployment concern; the core only needs
/// create/update/delete plus the status scan the monitoring sweep runs on.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session record.
    async fn create(&self, session_id: &str, attributes: SessionAttributes) -> Result<()>;

    /// Replace an existing session record.
    async fn update(&self, session_id: &str, attributes: SessionAttributes) -> Result<()>;

    /// Fetch a session record.
    async fn get(&self, session_id: &str) -> Result<Option<SessionAttributes>>;

    /// Remove a session record.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// All records currently in one of the given states.
    async fn find_by_status(
        &self,
        statuses: &[SessionState],
    ) -> Result<Vec<(String, SessionAttributes)>>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory store for tests.

    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct InMemorySessionStore {
        records: RwLock<HashMap<String, SessionAttributes>>,
    }

    impl InMemorySessionStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn len(&self) -> usize {
            self.records.read().await.len()
        }
    }

    #[async_trait]
    impl SessionStore for InMemorySessionStore {
        async fn create(&self, session_id: &str, attributes: SessionAttributes) -> Result<()> {
            self.records
                .write()
                .await
                .insert(session_id.to_string(), attributes);
            Ok(())
        }

        async fn update(&self, session_id: &str, attributes: SessionAttributes) -> Result<()> {
            self.records
                .write()
                .await
                .insert(session_id.to_string(), attributes);
            Ok(())
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
}
