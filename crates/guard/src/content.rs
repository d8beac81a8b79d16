//! Content policy: keep politics and religion out of the conversation.

use async_trait::async_trait;
use stockwise_config::ContentPolicyConfig;
use stockwise_core::error::MiddlewareError;
use stockwise_core::message::Role;
use stockwise_core::state::{AgentState, StatePatch};
use tracing::info;
use crate::Middleware;

/// Removes the model's latest reply, with no replacement, when it contains
/// any restricted word (case-insensitive substring match). User messages are
/// never scanned.
#[derive(Debug, Clone)]
pub struct ContentPolicy {
    words: Vec<String>,
}

impl ContentPolicy {
    pub fn new(words: Vec<String>) -> Self {
        Self {
            words: words.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// The first restricted word found in `text`.
    pub fn find_restricted(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.words
            .iter()
            .find(|w| lowered.contains(w.as_str()))
            .map(String::as_str)
    }
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self::new(ContentPolicyConfig::default().words)
    }
}

#[async_trait]
impl Middleware for ContentPolicy {
    fn name(&self) -> &str {
        "content_policy"
    }

    async fn after_model(&self, state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
        let Some(last) = state.last_message().filter(|m| m.role == Role::Assistant) else {
            return Ok(None);
        };
        let Some(word) = self.find_restricted(&last.content) else {
            return Ok(None);
        };

        info!(thread_id = %state.thread_id, word, "Content policy removed a message");
        Ok(Some(StatePatch::remove(vec![last.id.clone()])))
    }
}
