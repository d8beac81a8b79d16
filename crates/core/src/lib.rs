//! # Stockwise Core
//!
//! Domain types, traits, and error definitions for the Stockwise agent.
//! Everything the reasoning loop touches is defined here: messages, the
//! per-turn [`AgentState`], the [`Provider`] and [`Tool`] collaborator
//! traits, loop events, and the checkpoint store seam.
//!
//! Implementations live in their respective crates; all crates depend
//! inward on core.

pub mod checkpoint;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod state;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use checkpoint::{InMemoryStateStore, StateStore};
pub use error::{
    Error, MiddlewareError, ProviderError, ProviderErrorKind, Result, StoreError, ToolError,
};
pub use event::{AgentEvent, EventBus, TurnObserver};
pub use message::{Message, MessageId, Role};
pub use provider::{ModelOptions, Provider, ProviderRequest, ProviderResponse, Usage};
pub use state::{AgentAction, AgentFinish, AgentOutcome, AgentState, AgentStep, StatePatch};
pub use tool::{FnTool, Observation, Tool, ToolOutput, ToolRegistry};
