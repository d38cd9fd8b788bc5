//! Session persistence layer
//!
//! Holds one `WorkflowState` per active user session. The per-session
//! mutex is the serialization point: two requests for the same user are
//! processed strictly sequentially, distinct users run independently.
//!
//! The in-memory backend is non-durable and suitable only for
//! single-process deployments; an externally backed implementation can be
//! substituted through the trait.

use crate::models::WorkflowState;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Handle to one session's state; locking it serializes access
pub type SessionHandle = Arc<Mutex<WorkflowState>>;

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Option<SessionHandle>;
    /// Atomic get-or-create: inserts `state` only when the user has no
    /// session, otherwise returns the existing handle and drops `state`.
    /// The flag reports whether the insert happened, so concurrent first
    /// submits resolve to a single session instead of overwriting each
    /// other.
    async fn create(&self, user_id: &str, state: WorkflowState) -> (SessionHandle, bool);
    /// Evict a session; returns whether one existed
    async fn remove(&self, user_id: &str) -> bool;
    /// Idle sessions for an external supervisor to expire. Sessions whose
    /// lock is currently held are active and never reported.
    async fn list_stale(&self, older_than: DateTime<Utc>) -> Vec<String>;
}

/// In-memory session store for single-process deployments
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, user_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(user_id).cloned()
    }

    async fn create(&self, user_id: &str, state: WorkflowState) -> (SessionHandle, bool) {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(user_id.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let handle = Arc::new(Mutex::new(state));
                entry.insert(handle.clone());
                (handle, true)
            }
        }
    }

    async fn remove(&self, user_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(user_id).is_some()
    }

    async fn list_stale(&self, older_than: DateTime<Utc>) -> Vec<String> {
        let sessions = self.sessions.read().await;

        let mut stale = Vec::new();
        for (user_id, handle) in sessions.iter() {
            if let Ok(state) = handle.try_lock() {
                if state.updated_at < older_than {
                    stale.push(user_id.clone());
                }
            }
        }

        stale
    }
}
