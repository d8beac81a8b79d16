//! Policy middleware for Stockwise: hooks that run immediately before and
//! after every model call.
//!
//! Provides:
//! - **Summarization**: compress long histories with a dedicated summary model
//! - **TrimMessages**: keep the first message plus the most recent few
//! - **SecurityScan**: refuse requests that mention credentials or internal data
//! - **PII**: redact e-mails, mask card numbers, block API keys
//! - **PruneOldMessages**: drop the oldest turns after each model call
//! - **ContentPolicy**: drop model replies touching politics or religion
//!
//! Hooks never touch the state directly. Each returns an optional
//! [`StatePatch`]; the [`MiddlewareChain`] applies it before the next hook
//! runs, in declared order.

pub mod content;
pub mod pii;
pub mod prune;
pub mod security;
pub mod summarize;
pub mod trim;

use async_trait::async_trait;
use std::sync::Arc;
use stockwise_config::MiddlewareConfig;
use stockwise_core::error::MiddlewareError;
use stockwise_core::provider::{ModelOptions, Provider};
use stockwise_core::state::{AgentState, StatePatch};
use tracing::debug;

pub use content::ContentPolicy;
pub use pii::{PiiDetector, PiiMiddleware};
pub use prune::PruneOldMessages;
pub use security::SecurityScan;
pub use summarize::Summarization;
pub use trim::TrimMessages;

/// Where in the cycle a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeModel,
    AfterModel,
}

/// A policy hook.
///
/// Both methods default to "no change", so a hook only implements the side
/// it cares about.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn before_model(&self, _state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
        Ok(None)
    }

    async fn after_model(&self, _state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
        Ok(None)
    }
}

/// What a chain run did to the state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Names of the hooks that returned a patch, in order
    pub triggered: Vec<String>,
    /// Whether a hook asked to end the turn
    pub halted: bool,
}

/// An ordered list of hooks.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    hooks: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: Arc<dyn Middleware>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn push(&mut self, hook: Arc<dyn Middleware>) {
        self.hooks.push(hook);
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook for `point` in order, applying each patch before the
    /// next hook sees the state. Stops early when a hook halts.
    pub async fn run(
        &self,
        point: HookPoint,
        state: &mut AgentState,
    ) -> Result<ChainReport, MiddlewareError> {
        let mut report = ChainReport::default();

        for hook in &self.hooks {
            let patch = match point {
                HookPoint::BeforeModel => hook.before_model(state).await?,
                HookPoint::AfterModel => hook.after_model(state).await?,
            };
            let Some(patch) = patch else { continue };

            debug!(
                middleware = hook.name(),
                ?point,
                removed = patch.remove.len(),
                added = patch.add.len(),
                remove_all = patch.remove_all,
                jump_to_end = patch.jump_to_end,
                "Middleware patched state"
            );
            report.triggered.push(hook.name().to_string());

            if state.apply(patch) {
                report.halted = true;
                break;
            }
        }

        Ok(report)
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("hooks", &self.names())
            .finish()
    }
}

/// Build the default chain from configuration.
///
/// Order: summarization, PII, trim, security (before the model), then
/// prune, content policy (after). Disabled hooks are left out. The summary
/// backend is only needed when summarization is enabled.
pub fn build_chain(
    config: &MiddlewareConfig,
    summary: Option<(Arc<dyn Provider>, ModelOptions)>,
) -> Result<MiddlewareChain, MiddlewareError> {
    let mut chain = MiddlewareChain::new();

    if config.summarization.enabled {
        let (provider, options) = summary.ok_or_else(|| MiddlewareError::Failed {
            middleware: "summarization".into(),
            reason: "enabled but no summary model is configured".into(),
        })?;
        chain.push(Arc::new(Summarization::from_config(
            &config.summarization,
            provider,
            options,
        )));
    }
    if config.pii.enabled {
        chain.push(Arc::new(PiiMiddleware::from_config(&config.pii)?));
    }
    if config.trim.enabled {
        chain.push(Arc::new(TrimMessages::new(config.trim.keep_threshold)));
    }
    if config.security.enabled {
        chain.push(Arc::new(SecurityScan::from_config(&config.security)?));
    }
    if config.prune.enabled {
        chain.push(Arc::new(PruneOldMessages::new(config.prune.bound)));
    }
    if config.content_policy.enabled {
        chain.push(Arc::new(ContentPolicy::new(config.content_policy.words.clone())));
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockwise_core::message::Message;

    /// Appends a marker message before the model.
    struct Marker(&'static str);

    #[async_trait]
    impl Middleware for Marker {
        fn name(&self) -> &str {
            self.0
        }

        async fn before_model(&self, _state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
            Ok(Some(StatePatch::default().and_add(Message::system(self.0))))
        }
    }

    /// Halts the cycle.
    struct Halt;

    #[async_trait]
    impl Middleware for Halt {
        fn name(&self) -> &str {
            "halt"
        }

        async fn before_model(&self, _state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
            Ok(Some(StatePatch::default().and_jump_to_end()))
        }
    }

    /// Sees the state after the previous hook's patch.
    struct CountCheck(usize);

    #[async_trait]
    impl Middleware for CountCheck {
        fn name(&self) -> &str {
            "count_check"
        }

        async fn before_model(&self, state: &AgentState) -> Result<Option<StatePatch>, MiddlewareError> {
            assert_eq!(state.messages.len(), self.0);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn hooks_run_in_order_and_see_previous_patches() {
        let chain = MiddlewareChain::new()
            .with(Arc::new(Marker("a")))
            .with(Arc::new(CountCheck(2)))
            .with(Arc::new(Marker("b")));
        let mut state = AgentState::new("t");
        state.push(Message::user("hi"));

        let report = chain.run(HookPoint::BeforeModel, &mut state).await.unwrap();
        assert_eq!(report.triggered, vec!["a", "b"]);
        assert!(!report.halted);
        let contents: Vec<_> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "a", "b"]);
    }

    #[tokio::test]
    async fn halt_stops_the_chain() {
        let chain = MiddlewareChain::new()
            .with(Arc::new(Halt))
            .with(Arc::new(Marker("never")));
        let mut state = AgentState::new("t");

        let report = chain.run(HookPoint::BeforeModel, &mut state).await.unwrap();
        assert!(report.halted);
        assert_eq!(report.triggered, vec!["halt"]);
        assert!(state.messages.is_empty());
    }

    #[tokio::test]
    async fn after_point_skips_before_only_hooks() {
        let chain = MiddlewareChain::new().with(Arc::new(Marker("a")));
        let mut state = AgentState::new("t");
        let report = chain.run(HookPoint::AfterModel, &mut state).await.unwrap();
        assert!(report.triggered.is_empty());
    }

    #[test]
    fn default_chain_without_summary_model_fails() {
        let config = MiddlewareConfig::default();
        assert!(build_chain(&config, None).is_err());
    }

    #[test]
    fn chain_built_from_config_in_order() {
        let mut config = MiddlewareConfig::default();
        config.summarization.enabled = false;
        let chain = build_chain(&config, None).unwrap();
        assert_eq!(
            chain.names(),
            vec!["pii", "trim_messages", "security_scan", "prune_old_messages", "content_policy"]
        );

        config.pii.enabled = false;
        config.content_policy.enabled = false;
        let chain = build_chain(&config, None).unwrap();
        assert_eq!(chain.len(), 3);
    }

    #[tokio::test]
    async fn pii_block_wins_over_security_scan() {
        let mut config = MiddlewareConfig::default();
        config.summarization.enabled = false;
        let chain = build_chain(&config, None).unwrap();

        let mut state = AgentState::new("t");
        state.push(Message::user(format!("my password key is sk-{}", "a".repeat(32))));

        let report = chain.run(HookPoint::BeforeModel, &mut state).await.unwrap();
        assert!(report.halted);
        assert_eq!(report.triggered, vec!["pii"]);
        assert_eq!(state.messages.len(), 1);
        assert!(state.messages[0].content.contains("민감한 정보(api_key)"));
    }
}
