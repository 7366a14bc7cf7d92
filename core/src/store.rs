//! Persistence seam for finished session transcripts.

use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::auth::UserId;
use crate::error::EngineError;

/// Append-only storage of flattened transcripts, queryable per user.
///
/// How sessions map to users is the implementation's concern; the engine
/// only ever appends by session id and lists by user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append(&self, session_id: &str, message: &str) -> Result<(), EngineError>;

    /// Transcripts of the user's sessions, oldest first.
    async fn list(&self, user: &UserId) -> Result<Vec<String>, EngineError>;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    /// Session id to accumulated transcript, in creation order.
    transcripts: IndexMap<String, String>,
    /// User to owned session ids.
    owners: HashMap<UserId, Vec<String>>,
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `user` owns `session_id`. Listing only returns sessions
    /// granted here.
    pub async fn grant(&self, user: &UserId, session_id: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .owners
            .entry(user.clone())
            .or_default()
            .push(session_id.to_string());
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn append(&self, session_id: &str, message: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        inner
            .transcripts
            .entry(session_id.to_string())
            .or_default()
            .push_str(message);
        Ok(())
    }

    async fn list(&self, user: &UserId) -> Result<Vec<String>, EngineError> {
        let inner = self.inner.lock().await;
        let Some(sessions) = inner.owners.get(user) else {
            return Ok(Vec::new());
        };
        Ok(sessions
            .iter()
            .filter_map(|id| inner.transcripts.get(id).cloned())
            .collect())
    }
}
