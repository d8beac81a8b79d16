//! Built-in tools for Stockwise.
//!
//! - `get_current_date`: today's date and weekday
//! - `get_retrieve_context`: document retrieval over a [`DocumentStore`]
//!
//! Market data and web search tools are supplied by the embedding
//! application through the same [`Tool`](stockwise_core::tool::Tool) trait.

pub mod date;
pub mod retriever;

use std::sync::Arc;
use stockwise_core::tool::ToolRegistry;

pub use date::CurrentDateTool;
pub use retriever::{Document, DocumentStore, InMemoryDocumentStore, RetrieverTool};

/// A registry with every built-in tool, retrieving from `documents`.
pub fn default_registry(documents: Arc<dyn DocumentStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CurrentDateTool));
    registry.register(Box::new(RetrieverTool::new(documents)));
    registry
}
