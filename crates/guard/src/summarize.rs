//! Summarization: compress long histories with a dedicated summary model.

use async_trait::async_trait;
use std::sync::Arc;
use stockwise_config::SummarizationConfig;
use stockwise_core::error::MiddlewareError;
use stockwise_core::message::{estimated_tokens, Message};
use stockwise_core::provider::{ModelOptions, Provider, ProviderRequest};
use stockwise_core::state::{AgentState, StatePatch};
use tracing::{debug, info};
use crate::Middleware;

const SUMMARY_PROMPT: &str = "이전 대화 내용을 간결하게 요약하되, 핵심 정보와 결론을 유지하세요.
불필요한 인사말, 반복된 문장은 생략하고, 사용자의 의도와 모델의 주요 응답만 포함하세요.
요약 형식:
- 주요 내용 요약:";

const SUMMARY_HEADER: &str = "Summary of the conversation so far:";

/// Replaces everything but the most recent messages with one system
/// message summarizing them, once the history is estimated to be too large.
pub struct Summarization {
    provider: Arc<dyn Provider>,
    options: ModelOptions,
    max_tokens_before_summary: usize,
    messages_to_keep: usize,
}

impl Summarization {
    pub fn new(
        provider: Arc<dyn Provider>,
        options: ModelOptions,
        max_tokens_before_summary: usize,
        messages_to_keep: usize,
    ) -> Self {
        Self {
            provider,
            options,
            max_tokens_before_summary,
            messages_to_keep,
        }
    }

    pub fn from_config(
        config: &SummarizationConfig,
        provider: Arc<dyn Provider>,
        options: ModelOptions,
    ) -> Self {
        Self::new(
            provider,
            options,
            config.max_tokens_before_summary,
            config.messages_to_keep,
        )
    }

    fn transcript(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Middleware for Summarization {
    fn name(&self) -> &str {
        "summarization"
    }

    async fn before_model(&self, state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
        let messages = &state.messages;
        let tokens = estimated_tokens(messages);
        if tokens <= self.max_tokens_before_summary || messages.len() <= self.messages_to_keep {
            return Ok(None);
        }

        let split = messages.len() - self.messages_to_keep;
        let (older, recent) = messages.split_at(split);
        debug!(
            thread_id = %state.thread_id,
            tokens,
            summarized = older.len(),
            kept = recent.len(),
            "Summarizing history"
        );

        let request = ProviderRequest::new(
            &self.options,
            vec![
                Message::system(SUMMARY_PROMPT),
                Message::user(Self::transcript(older)),
            ],
        );
        let response = self.provider.complete(request).await?;

        let mut summary = Message::system(format!("{SUMMARY_HEADER}\n{}", response.content.trim()));
        summary
            .metadata
            .insert("summary".into(), serde_json::Value::Bool(true));

        info!(thread_id = %state.thread_id, summarized = older.len(), "History summarized");

        let mut kept = Vec::with_capacity(recent.len() + 1);
        kept.push(summary);
        kept.extend(recent.iter().cloned());
        Ok(Some(StatePatch::replace_all(kept)))
    }
}

impl std::fmt::Debug for Summarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summarization")
            .field("provider", &self.provider.name())
            .field("options", &self.options)
            .field("max_tokens_before_summary", &self.max_tokens_before_summary)
            .field("messages_to_keep", &self.messages_to_keep)
            .finish()
    }
}
