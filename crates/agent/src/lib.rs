//! The Stockwise agent: a ReAct reasoning loop.
//!
//! Each turn runs **Reason → Act → Observe** cycles:
//!
//! 1. **Receive** a user message on a conversation thread
//! 2. **Render** the ReAct prompt (persona, dialogue, tools, scratchpad)
//! 3. **Send to the model** via the configured provider
//! 4. **If a tool call**: run the tool, record the observation, loop to 2
//! 5. **If a final answer**: return it to the caller
//!
//! Policy middleware wraps every model call, and the loop ends on a final
//! answer, a halting policy, the step ceiling, a call limit or the
//! deadline.

pub mod parser;
pub mod prompt;
pub mod runner;
pub mod scratchpad;
pub mod trace;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use parser::parse;
pub use prompt::{DEFAULT_SYSTEM_PROMPT, STOP_SEQUENCE};
pub use runner::{
    AgentRunner, CallLimits, TurnConfig, TurnError, TurnResult, TurnStatus, FAILURE_NOTICE,
    LIMIT_NOTICE, WITHHELD_NOTICE,
};
pub use trace::{RunKind, RunStatus, RunTrace, TraceRecorder};

use std::sync::Arc;
use stockwise_config::AppConfig;
use stockwise_core::tool::ToolRegistry;
use stockwise_providers::{build_reasoning_backend, build_summary_backend};

/// Wire a runner from configuration: the reasoning backend from `[model]`,
/// the policy chain from `[middleware]` and the persona from `[agent]`.
pub fn build_runner(
    config: &AppConfig,
    tools: Arc<ToolRegistry>,
) -> Result<AgentRunner, stockwise_core::Error> {
    let reasoning = build_reasoning_backend(config)?;

    let summary = if config.middleware.summarization.enabled {
        let backend = build_summary_backend(config)?;
        Some((backend.provider, backend.options))
    } else {
        None
    };
    let chain = stockwise_guard::build_chain(&config.middleware, summary)?;

    let mut runner = AgentRunner::new(reasoning.provider, reasoning.options, tools).with_middleware(chain);
    if let Some(prompt) = &config.agent.system_prompt {
        runner = runner.with_system_prompt(prompt.clone());
    }
    Ok(runner)
}
