//! Security scan: refuse requests that carry credentials or internal data.

use async_trait::async_trait;
use regex_lite::Regex;
use stockwise_config::SecurityConfig;
use stockwise_core::error::MiddlewareError;
use stockwise_core::message::Message;
use stockwise_core::state::{AgentState, StatePatch};
use tracing::info;
use crate::Middleware;

/// Matches the latest message against a case-insensitive deny-list. On a
/// hit the message is removed, a fixed warning is appended, and the turn
/// ends without calling the model.
pub struct SecurityScan {
    patterns: Vec<Regex>,
    warning: String,
}

impl SecurityScan {
    /// Compile the deny-list. Patterns are matched case-insensitively.
    pub fn new<I, S>(patterns: I, warning: impl Into<String>) -> Result<Self, MiddlewareError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(&format!("(?i){p}")).map_err(|e| MiddlewareError::Failed {
                    middleware: "security_scan".into(),
                    reason: format!("invalid pattern '{p}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            patterns,
            warning: warning.into(),
        })
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self, MiddlewareError> {
        Self::new(&config.patterns, config.warning.clone())
    }

    /// The first deny-list pattern `text` matches.
    pub fn find_violation(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|re| re.is_match(text))
            .map(|re| re.as_str().trim_start_matches("(?i)"))
    }
}

impl Default for SecurityScan {
    fn default() -> Self {
        let config = SecurityConfig::default();
        Self {
            patterns: config
                .patterns
                .iter()
                .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
                .collect(),
            warning: config.warning,
        }
    }
}

#[async_trait]
impl Middleware for SecurityScan {
    fn name(&self) -> &str {
        "security_scan"
    }

    async fn before_model(&self, state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
        let Some(last) = state.last_message() else {
            return Ok(None);
        };
        let Some(pattern) = self.find_violation(&last.content) else {
            return Ok(None);
        };

        info!(thread_id = %state.thread_id, pattern, "Security policy blocked a request");

        let mut warning = Message::assistant(self.warning.clone());
        warning
            .metadata
            .insert("policy".into(), serde_json::Value::String(self.name().into()));

        Ok(Some(
            StatePatch::remove(vec![last.id.clone()])
                .and_add(warning)
                .and_jump_to_end(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockwise_core::message::Role;

    fn state_with(text: &str) -> AgentState {
        let mut state = AgentState::new("t");
        state.push(Message::user("earlier question"));
        state.push(Message::user(text));
        state
    }

    #[tokio::test]
    async fn password_is_blocked() {
        let scan = SecurityScan::default();
        let mut state = state_with("my password is hunter2");

        let patch = scan.before_model(&state).await.unwrap().unwrap();
        assert!(state.apply(patch));

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].content, "earlier question");
        let last = state.last_message().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("보안 정책"));
        assert!(!state.messages.iter().any(|m| m.content.contains("hunter2")));
    }

    #[tokio::test]
    async fn matching_is_case_insensitive() {
        let scan = SecurityScan::default();
        for text in ["PASSWORD", "my Api-Key", "API_KEY=1", "Confidential memo", "주민등록번호 알려줘"] {
            assert!(scan.find_violation(text).is_some(), "{text} should match");
        }
    }

    #[tokio::test]
    async fn clean_text_passes() {
        let scan = SecurityScan::default();
        let state = state_with("삼성전자 PER 알려줘");
        assert!(scan.before_model(&state).await.unwrap().is_none());
        assert!(scan.before_model(&AgentState::new("empty")).await.unwrap().is_none());
    }

    #[test]
    fn custom_patterns_and_invalid_regex() {
        let scan = SecurityScan::new(["account\\s+number"], "no").unwrap();
        assert_eq!(scan.find_violation("my ACCOUNT  number"), Some("account\\s+number"));
        assert!(SecurityScan::new(["("], "no").is_err());
    }
}
