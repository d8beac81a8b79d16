//! Trim history before each model call.

use async_trait::async_trait;
use stockwise_core::error::MiddlewareError;
use stockwise_core::state::{AgentState, StatePatch};
use crate::Middleware;

/// Keeps the first message plus the most recent three (even length) or four
/// (odd length) once the history grows past `keep_threshold`.
#[derive(Debug, Clone)]
pub struct TrimMessages {
    keep_threshold: usize,
}

impl TrimMessages {
    pub fn new(keep_threshold: usize) -> Self {
        Self { keep_threshold }
    }
}

impl Default for TrimMessages {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl Middleware for TrimMessages {
    fn name(&self) -> &str {
        "trim_messages"
    }

    async fn before_model(&self, state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
        let messages = &state.messages;
        let len = messages.len();
        if len <= self.keep_threshold {
            return Ok(None);
        }

        let recent = if len % 2 == 0 { 3 } else { 4 };
        let tail_start = len.saturating_sub(recent).max(1);

        let mut kept = Vec::with_capacity(recent + 1);
        kept.push(messages[0].clone());
        kept.extend(messages[tail_start..].iter().cloned());

        if kept.len() == len {
            return Ok(None);
        }
        Ok(Some(StatePatch::replace_all(kept)))
    }
}
