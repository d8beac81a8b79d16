//! ReAct output parser.
//!
//! Classifies free-text model output as a tool call or a final answer. It
//! never fails: text that is neither is treated as the answer.

use regex_lite::Regex;
use std::sync::LazyLock;
use stockwise_core::state::{AgentAction, AgentFinish, AgentOutcome};

const FINAL_ANSWER: &str = "Final Answer:";

static ACTION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)Action: (.*?)[\n]*Action Input: ([\s\S]*)").ok());

/// Parse one model response.
///
/// - `Final Answer:` anywhere wins; the answer is what follows its last
///   occurrence, trimmed.
/// - Otherwise an `Action:` / `Action Input:` pair becomes a tool call. The
///   input is cut at its first newline, then trimmed of spaces and quotes.
/// - Otherwise the whole text is the answer.
pub fn parse(text: &str) -> AgentOutcome {
    if let Some((_, answer)) = text.rsplit_once(FINAL_ANSWER) {
        return AgentOutcome::Finish(AgentFinish {
            output: answer.trim().to_string(),
            log: text.to_string(),
        });
    }

    if let Some(caps) = ACTION_RE.as_ref().and_then(|re| re.captures(text)) {
        let tool = caps.get(1).map_or("", |m| m.as_str()).trim();
        let raw_input = caps.get(2).map_or("", |m| m.as_str());
        let first_line = raw_input.split('\n').next().unwrap_or_default();
        let tool_input = first_line.trim().trim_matches(' ').trim_matches('"');

        return AgentOutcome::ToolCall(AgentAction {
            tool: tool.to_string(),
            tool_input: tool_input.to_string(),
            log: text.to_string(),
        });
    }

    AgentOutcome::Finish(AgentFinish {
        output: text.to_string(),
        log: text.to_string(),
    })
}
