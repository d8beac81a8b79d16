//! Loop events: how the reasoning loop reports progress to the outside.
//!
//! The runner emits an [`AgentEvent`] at every lifecycle point of a turn.
//! Anything that wants to watch (a broadcast bus, a trace recorder, a test)
//! implements [`TurnObserver`]. Observers cannot fail the turn: the hook
//! returns nothing and is called fire-and-forget.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All loop events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A top-level turn began
    TurnStarted {
        thread_id: String,
        input: String,
    },

    /// A reasoning cycle began (1-based)
    CycleStarted { thread_id: String, cycle: usize },

    /// The model is about to be called with the rendered prompt
    ModelCallStarted {
        thread_id: String,
        cycle: usize,
        model: String,
        input: String,
    },

    /// The model returned text
    ModelCallFinished {
        thread_id: String,
        cycle: usize,
        model: String,
        output: String,
        duration_ms: u64,
    },

    /// The model call failed for good (after retries)
    ModelCallFailed {
        thread_id: String,
        cycle: usize,
        model: String,
        error: String,
        duration_ms: u64,
    },

    /// A tool is about to run
    ToolCallStarted {
        thread_id: String,
        cycle: usize,
        tool: String,
        input: String,
    },

    /// A tool returned successfully
    ToolCallFinished {
        thread_id: String,
        cycle: usize,
        tool: String,
        output: String,
        duration_ms: u64,
    },

    /// A tool failed or was not found; the error became the observation
    ToolCallFailed {
        thread_id: String,
        cycle: usize,
        tool: String,
        error: String,
        duration_ms: u64,
    },

    /// The model produced a final answer
    FinalAnswer {
        thread_id: String,
        cycles: usize,
        output: String,
    },

    /// A step ceiling, call limit or deadline ended the turn
    LimitReached {
        thread_id: String,
        cycles: usize,
        limit: String,
    },

    /// The turn ended because of an unrecoverable error
    TurnFailed { thread_id: String, error: String },

    /// A middleware hook edited or halted the state
    PolicyTriggered {
        thread_id: String,
        middleware: String,
        halted: bool,
    },
}

impl AgentEvent {
    pub fn thread_id(&self) -> &str {
        match self {
            Self::TurnStarted { thread_id, .. }
            | Self::CycleStarted { thread_id, .. }
            | Self::ModelCallStarted { thread_id, .. }
            | Self::ModelCallFinished { thread_id, .. }
            | Self::ModelCallFailed { thread_id, .. }
            | Self::ToolCallStarted { thread_id, .. }
            | Self::ToolCallFinished { thread_id, .. }
            | Self::ToolCallFailed { thread_id, .. }
            | Self::FinalAnswer { thread_id, .. }
            | Self::LimitReached { thread_id, .. }
            | Self::TurnFailed { thread_id, .. }
            | Self::PolicyTriggered { thread_id, .. } => thread_id,
        }
    }
}

/// Receives loop events.
pub trait TurnObserver: Send + Sync {
    fn on_event(&self, event: &AgentEvent);
}

/// A broadcast-based event bus for loop events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. A lagging or
/// absent subscriber never blocks the publisher.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TurnObserver for EventBus {
    fn on_event(&self, event: &AgentEvent) {
        self.publish(event.clone());
    }
}
