//! PII handling: redact e-mails, mask card numbers, block API keys.

use async_trait::async_trait;
use regex_lite::{Captures, Regex};
use stockwise_config::{PiiConfig, PiiStrategy};
use stockwise_core::error::MiddlewareError;
use stockwise_core::message::Message;
use stockwise_core::state::{AgentState, StatePatch};
use tracing::info;
use crate::Middleware;

const EMAIL_PATTERN: &str = r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}";
const CREDIT_CARD_PATTERN: &str = r"\b(?:\d[ -]*?){13,19}\b";
const API_KEY_PATTERN: &str = r"sk-[a-zA-Z0-9]{32}";

/// One kind of PII and what to do when it shows up.
pub struct PiiDetector {
    name: String,
    regex: Regex,
    strategy: PiiStrategy,
}

/// Result of running a detector over some text.
#[derive(Debug, PartialEq, Eq)]
enum Scan {
    Clean,
    Rewritten(String),
    Blocked,
}

impl PiiDetector {
    pub fn new(name: impl Into<String>, pattern: &str, strategy: PiiStrategy) -> Result<Self, MiddlewareError> {
        let name = name.into();
        let regex = Regex::new(pattern).map_err(|e| MiddlewareError::Failed {
            middleware: "pii".into(),
            reason: format!("invalid pattern for '{name}': {e}"),
        })?;
        Ok(Self { name, regex, strategy })
    }

    pub fn email(strategy: PiiStrategy) -> Result<Self, MiddlewareError> {
        Self::new("email", EMAIL_PATTERN, strategy)
    }

    pub fn credit_card(strategy: PiiStrategy) -> Result<Self, MiddlewareError> {
        Self::new("credit_card", CREDIT_CARD_PATTERN, strategy)
    }

    pub fn api_key(strategy: PiiStrategy) -> Result<Self, MiddlewareError> {
        Self::new("api_key", API_KEY_PATTERN, strategy)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> PiiStrategy {
        self.strategy
    }

    fn scan(&self, text: &str) -> Scan {
        if self.strategy == PiiStrategy::Allow || !self.regex.is_match(text) {
            return Scan::Clean;
        }
        match self.strategy {
            PiiStrategy::Allow => Scan::Clean,
            PiiStrategy::Block => Scan::Blocked,
            PiiStrategy::Redact => {
                let marker = format!("[REDACTED_{}]", self.name.to_uppercase());
                Scan::Rewritten(self.regex.replace_all(text, marker.as_str()).into_owned())
            }
            PiiStrategy::Mask => Scan::Rewritten(
                self.regex
                    .replace_all(text, |caps: &Captures<'_>| mask(&caps[0]))
                    .into_owned(),
            ),
        }
    }
}

impl std::fmt::Debug for PiiDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiiDetector")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Star out every alphanumeric except the last four; separators stay.
fn mask(span: &str) -> String {
    let total = span.chars().filter(|c| c.is_alphanumeric()).count();
    let hidden = total.saturating_sub(4);
    let mut seen = 0;
    span.chars()
        .map(|c| {
            if !c.is_alphanumeric() {
                return c;
            }
            seen += 1;
            if seen <= hidden { '*' } else { c }
        })
        .collect()
}

/// Applies every detector to the latest message before the model sees it.
///
/// Rewrites replace the message in place (same role, new id). A block
/// removes the message, appends a policy notice and ends the turn.
#[derive(Debug)]
pub struct PiiMiddleware {
    detectors: Vec<PiiDetector>,
}

impl PiiMiddleware {
    pub fn new(detectors: Vec<PiiDetector>) -> Self {
        Self { detectors }
    }

    pub fn from_config(config: &PiiConfig) -> Result<Self, MiddlewareError> {
        Ok(Self::new(vec![
            PiiDetector::email(config.email)?,
            PiiDetector::credit_card(config.credit_card)?,
            PiiDetector::api_key(config.api_key)?,
        ]))
    }
}

#[async_trait]
impl Middleware for PiiMiddleware {
    fn name(&self) -> &str {
        "pii"
    }

    async fn before_model(&self, state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
        let Some(last) = state.last_message() else {
            return Ok(None);
        };

        let mut text = last.content.clone();
        let mut rewritten = Vec::new();
        for detector in &self.detectors {
            match detector.scan(&text) {
                Scan::Clean => {}
                Scan::Rewritten(next) => {
                    rewritten.push(detector.name());
                    text = next;
                }
                Scan::Blocked => {
                    info!(thread_id = %state.thread_id, kind = detector.name(), "PII policy blocked a request");
                    let mut notice = Message::assistant(format!(
                        "민감한 정보({})가 감지되어 요청을 처리할 수 없습니다.",
                        detector.name()
                    ));
                    notice
                        .metadata
                        .insert("policy".into(), serde_json::Value::String("pii".into()));
                    return Ok(Some(
                        StatePatch::remove(vec![last.id.clone()])
                            .and_add(notice)
                            .and_jump_to_end(),
                    ));
                }
            }
        }

        if rewritten.is_empty() {
            return Ok(None);
        }

        info!(thread_id = %state.thread_id, kinds = ?rewritten, "PII rewritten");
        let mut replacement = last.clone();
        replacement.id = Default::default();
        replacement.content = text;
        Ok(Some(StatePatch::remove(vec![last.id.clone()]).and_add(replacement)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockwise_core::message::Role;

    fn state_with(text: &str) -> AgentState {
        let mut state = AgentState::new("t");
        state.push(Message::assistant("안녕하세요"));
        state.push(Message::user(text));
        state
    }

    async fn run(text: &str) -> (AgentState, bool) {
        let mut state = state_with(text);
        let pii = PiiMiddleware::from_config(&PiiConfig::default()).unwrap();
        let halted = match pii.before_model(&state).await.unwrap() {
            Some(patch) => state.apply(patch),
            None => false,
        };
        (state, halted)
    }

    #[tokio::test]
    async fn email_is_redacted() {
        let (state, halted) = run("연락처는 kim.investor@example.co.kr 입니다").await;
        assert!(!halted);
        assert_eq!(state.messages.len(), 2);
        let last = state.last_message().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "연락처는 [REDACTED_EMAIL] 입니다");
    }

    #[tokio::test]
    async fn card_number_is_masked_keeping_last_four() {
        let (state, _) = run("card 1234-5678-9012-3456 please").await;
        assert_eq!(state.last_message().unwrap().content, "card ****-****-****-3456 please");
    }

    #[tokio::test]
    async fn api_key_blocks_the_turn() {
        let key = format!("sk-{}", "a1".repeat(16));
        let (state, halted) = run(&format!("my key is {key}")).await;
        assert!(halted);
        assert_eq!(state.messages.len(), 2);
        let last = state.last_message().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("api_key"));
        assert!(!state.messages.iter().any(|m| m.content.contains(&key)));
    }

    #[tokio::test]
    async fn clean_text_and_allow_strategy_pass() {
        let (state, halted) = run("삼성전자 배당 수익률은?").await;
        assert!(!halted);
        assert_eq!(state.last_message().unwrap().content, "삼성전자 배당 수익률은?");

        let allow_all = PiiMiddleware::new(vec![PiiDetector::email(PiiStrategy::Allow).unwrap()]);
        let state = state_with("me@example.com");
        assert!(allow_all.before_model(&state).await.unwrap().is_none());
    }

    #[test]
    fn mask_keeps_separators() {
        assert_eq!(mask("4111 1111 1111 1111"), "**** **** **** 1111");
        assert_eq!(mask("123"), "123");
    }

    #[test]
    fn invalid_custom_pattern_is_an_error() {
        assert!(PiiDetector::new("bad", "(", PiiStrategy::Redact).is_err());
    }
}
