//! Checkpoint store: per-thread persistence of [`AgentState`].
//!
//! A store keeps the latest state of each conversation thread so a later
//! turn on the same thread id picks up where the last one ended. Only the
//! serializable part of the state survives (intermediate steps are per
//! episode and never stored).

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use crate::error::StoreError;
use crate::state::AgentState;

/// The checkpoint store trait.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Load the latest state for a thread, if one was saved.
    async fn load(&self, thread_id: &str) -> Result<Option<AgentState>, StoreError>;

    /// Save (overwrite) the state for its thread.
    async fn save(&self, state: &AgentState) -> Result<(), StoreError>;

    /// Forget a thread. Returns whether anything was removed.
    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError>;

    /// All known thread ids.
    async fn threads(&self) -> Result<Vec<String>, StoreError>;
}

/// Volatile store backed by a `HashMap`.
#[derive(Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, AgentState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, thread_id: &str) -> Result<Option<AgentState>, StoreError> {
        Ok(self.states.read().await.get(thread_id).cloned())
    }

    async fn save(&self, state: &AgentState) -> Result<(), StoreError> {
        let mut stored = state.clone();
        stored.intermediate_steps.clear();
        self.states
            .write()
            .await
            .insert(state.thread_id.clone(), stored);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError> {
        Ok(self.states.write().await.remove(thread_id).is_some())
    }

    async fn threads(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.states.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
