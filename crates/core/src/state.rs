//! Per-turn execution state.
//!
//! An [`AgentState`] is created fresh for every top-level request (or
//! restored from a checkpoint), mutated in place by each reasoning cycle, and
//! handed back to the caller when the turn ends.

use serde::{Deserialize, Serialize};
use crate::message::{Message, MessageId, Role};

/// A tool call the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    /// Requested tool name (trimmed)
    pub tool: String,
    /// Single free-text input for the tool
    pub tool_input: String,
    /// The raw model text that produced this action
    pub log: String,
}

/// A final answer from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFinish {
    /// The answer text returned to the user
    pub output: String,
    /// The raw model text that produced this answer
    pub log: String,
}

/// Classification of one model response. Exactly one variant per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOutcome {
    ToolCall(AgentAction),
    Finish(AgentFinish),
}

impl AgentOutcome {
    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish(_))
    }

    /// The raw model text behind this outcome.
    pub fn log(&self) -> &str {
        match self {
            Self::ToolCall(action) => &action.log,
            Self::Finish(finish) => &finish.log,
        }
    }
}

/// One completed (action, observation) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub action: AgentAction,
    pub observation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<serde_json::Value>,
}

/// A set of edits a middleware hook wants applied to the state.
///
/// Applied in this order: `remove_all`, then `remove`, then `add`.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    /// Drop every message before adding
    pub remove_all: bool,
    /// Drop these messages by id
    pub remove: Vec<MessageId>,
    /// Append these messages
    pub add: Vec<Message>,
    /// Skip the model call for this cycle and end the turn
    pub jump_to_end: bool,
}

impl StatePatch {
    /// Replace the whole message list.
    pub fn replace_all(messages: Vec<Message>) -> Self {
        Self {
            remove_all: true,
            add: messages,
            ..Self::default()
        }
    }

    /// Remove the given messages.
    pub fn remove(ids: Vec<MessageId>) -> Self {
        Self {
            remove: ids,
            ..Self::default()
        }
    }

    /// Also append a message.
    pub fn and_add(mut self, message: Message) -> Self {
        self.add.push(message);
        self
    }

    /// Short-circuit the current cycle.
    pub fn and_jump_to_end(mut self) -> Self {
        self.jump_to_end = true;
        self
    }
}

/// The unit of execution context for one conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Conversation thread this state belongs to
    pub thread_id: String,

    /// Ordered role-tagged dialogue turns (chronological)
    pub messages: Vec<Message>,

    /// Steps of the current reasoning episode; never persisted
    #[serde(skip)]
    pub intermediate_steps: Vec<AgentStep>,

    /// Last classification result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AgentOutcome>,

    /// Opaque pass-through: caller's user identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Opaque pass-through: caller preferences
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub preferences: serde_json::Map<String, serde_json::Value>,
}

impl AgentState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            intermediate_steps: Vec::new(),
            outcome: None,
            user_id: None,
            preferences: serde_json::Map::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent user turn, if any survives pruning.
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Start a fresh reasoning episode.
    pub fn begin_episode(&mut self) {
        self.intermediate_steps.clear();
        self.outcome = None;
    }

    /// Record a completed tool execution.
    pub fn record_step(&mut self, step: AgentStep) {
        self.intermediate_steps.push(step);
    }

    /// Apply a middleware patch. Returns whether the patch asked to end the
    /// cycle early.
    pub fn apply(&mut self, patch: StatePatch) -> bool {
        if patch.remove_all {
            self.messages.clear();
        }
        if !patch.remove.is_empty() {
            self.messages.retain(|m| !patch.remove.contains(&m.id));
        }
        self.messages.extend(patch.add);
        patch.jump_to_end
    }
}
