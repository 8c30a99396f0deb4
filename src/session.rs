//! In-memory call sessions.
//!
//! Each session id owns its message history behind its own async mutex.
//! [`SessionRegistry::run_turn`] holds that mutex for the whole turn, so
//! turns on one session apply in arrival order while other sessions run
//! concurrently. The outer map lock is only held for lookups.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use sop_agent_core::conversation::Message;

type History = Arc<tokio::sync::Mutex<Vec<Message>>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, History>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new empty session and return its id.
    pub fn create(&self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        self.slot(&id);
        tracing::info!(session_id = %id, "session created");
        id
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, History>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, id: &str) -> History {
        Arc::clone(self.map().entry(id.to_string()).or_default())
    }

    /// Run one turn against the history of `id`, creating the session if
    /// needed.
    ///
    /// `turn` receives a snapshot of the history and returns its output
    /// together with the replacement history.
    pub async fn run_turn<F, Fut, T>(&self, id: &str, turn: F) -> T
    where
        F: FnOnce(Vec<Message>) -> Fut,
        Fut: Future<Output = (T, Vec<Message>)>,
    {
        let slot = self.slot(id);
        let mut history = slot.lock().await;
        let (out, updated) = turn(history.clone()).await;
        *history = updated;
        out
    }

    /// Current history of `id` (empty for unknown ids).
    pub async fn history(&self, id: &str) -> Vec<Message> {
        let slot = self.map().get(id).cloned();
        match slot {
            Some(slot) => slot.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Drop the session `id` and its history. Returns whether it existed.
    ///
    /// Waits for an in-flight turn on `id` to finish first.
    pub async fn clear(&self, id: &str) -> bool {
        let slot = self.map().get(id).cloned();
        let Some(slot) = slot else {
            return false;
        };
        let mut history = slot.lock().await;
        history.clear();
        {
            let mut map = self.map();
            if map.get(id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                map.remove(id);
            }
        }
        drop(history);
        tracing::info!(session_id = %id, "session cleared");
        true
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
