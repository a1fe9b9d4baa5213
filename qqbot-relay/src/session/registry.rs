//! Per-user session registry.
//!
//! One [`Session`] per user, created lazily on first contact and bound to the
//! catalog's default persona. Each session sits behind its own async mutex;
//! holding the guard serializes command and chat handling for that user while
//! other users proceed in parallel.

use super::types::Session;
use crate::onebot::UserId;
use crate::persona::PersonaCatalog;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct SessionRegistry {
    sessions: DashMap<UserId, Arc<Mutex<Session>>>,
    personas: Arc<PersonaCatalog>,
}

impl SessionRegistry {
    pub fn new(personas: Arc<PersonaCatalog>) -> Self {
        Self {
            sessions: DashMap::new(),
            personas,
        }
    }

    /// Lock the user's session, creating it if needed.
    ///
    /// The guard is the per-user critical section: keep it for the whole turn.
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<Session> {
        self.slot(user_id).await.lock_owned().await
    }

    /// Snapshot of the user's session, creating it if needed.
    pub async fn get(&self, user_id: UserId) -> Session {
        self.lock(user_id).await.clone()
    }

    /// Clear the user's history, keeping the persona.
    pub async fn reset(&self, user_id: UserId) {
        self.lock(user_id).await.reset();
    }

    /// Bind the user to `persona_id` and clear the history.
    pub async fn switch_persona(&self, user_id: UserId, persona_id: &str) {
        self.lock(user_id).await.switch_persona(persona_id);
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    async fn slot(&self, user_id: UserId) -> Arc<Mutex<Session>> {
        if let Some(existing) = self.sessions.get(&user_id) {
            return Arc::clone(existing.value());
        }

        // Resolve the persona outside the map shard lock.
        let persona_id = self
            .personas
            .find_default()
            .await
            .map(|p| p.id)
            .unwrap_or_default();

        let slot = self
            .sessions
            .entry(user_id)
            .or_insert_with(|| {
                tracing::debug!(user_id, persona = %persona_id, "Created session");
                Arc::new(Mutex::new(Session::new(user_id, persona_id)))
            });
        Arc::clone(slot.value())
    }
}
