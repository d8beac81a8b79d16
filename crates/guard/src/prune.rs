//! Drop the oldest turns after each model call.

use async_trait::async_trait;
use stockwise_core::error::MiddlewareError;
use stockwise_core::message::Role;
use stockwise_core::state::{AgentState, StatePatch};
use crate::Middleware;

/// Removes the two oldest messages whenever the model has just replied and
/// the history is longer than `bound`. Cycles that end in a tool call leave
/// no reply, so the history is left alone.
#[derive(Debug, Clone)]
pub struct PruneOldMessages {
    bound: usize,
}

impl PruneOldMessages {
    pub fn new(bound: usize) -> Self {
        Self { bound }
    }
}

impl Default for PruneOldMessages {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl Middleware for PruneOldMessages {
    fn name(&self) -> &str {
        "prune_old_messages"
    }

    async fn after_model(&self, state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
        let replied = state.last_message().is_some_and(|m| m.role == Role::Assistant);
        if !replied || state.messages.len() <= self.bound {
            return Ok(None);
        }
        let oldest = state.messages.iter().take(2).map(|m| m.id.clone()).collect();
        Ok(Some(StatePatch::remove(oldest)))
    }
}
