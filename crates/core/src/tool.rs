//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act: look up a date, query
//! a market index, search documents. The model selects a tool by name and
//! hands it a single free-text input string.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use crate::error::ToolError;

/// What a tool hands back.
///
/// Only `text` is fed into the prompt. The optional `artifact` (retrieved
/// documents, raw API payloads) is carried on the [`Observation`] for the
/// caller and never inspected by the loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            artifact: None,
        }
    }

    /// A (text, artifact) pair.
    pub fn with_artifact(text: impl Into<String>, artifact: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            artifact: Some(artifact),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

/// The result of routing one tool call through the registry.
///
/// Always produced, even for unknown tools or failing tools; `text` then
/// holds the error description the model gets to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// The tool that was requested
    pub tool: String,

    /// The observation text fed back to the model
    pub text: String,

    /// Whether the tool ran and returned successfully
    pub success: bool,

    /// Auxiliary artifact, if the tool produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<serde_json::Value>,
}

/// The core Tool trait.
///
/// Tools are registered in the [`ToolRegistry`] and shared by every
/// conversation thread, so implementations must be `Send + Sync`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_current_date").
    fn name(&self) -> &str;

    /// A description of what this tool does and what input it expects
    /// (shown to the model verbatim).
    fn description(&self) -> &str;

    /// Run the tool on the model-supplied input.
    async fn invoke(&self, input: &str) -> std::result::Result<ToolOutput, ToolError>;
}

type ToolFn = dyn Fn(&str) -> std::result::Result<ToolOutput, ToolError> + Send + Sync;

/// A tool built from a name, a description and a closure.
pub struct FnTool {
    name: String,
    description: String,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F, O>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<O, ToolError> + Send + Sync + 'static,
        O: Into<ToolOutput>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            func: Box::new(move |input| func(input).map(Into::into)),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, input: &str) -> std::result::Result<ToolOutput, ToolError> {
        (self.func)(input)
    }
}

/// A registry of available tools, keyed by exact name.
///
/// Registration order is preserved so the tool list rendered into the
/// prompt is stable.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a registry from a full tool list.
    pub fn from_tools(tools: Vec<Box<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&slot| self.tools[slot].as_ref())
    }

    /// Get a tool by name, rejecting unregistered names with a typed error.
    pub fn try_get(&self, name: &str) -> std::result::Result<&dyn Tool, ToolError> {
        self.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// List all registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// `(name, description)` pairs in registration order.
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        self.tools.iter().map(|t| (t.name(), t.description())).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call and turn the outcome into an observation.
    ///
    /// Never fails: unknown names and tool errors become observation text so
    /// the model can see what went wrong and correct itself.
    pub async fn invoke(&self, name: &str, input: &str) -> Observation {
        let tool = match self.try_get(name) {
            Ok(tool) => tool,
            Err(_) => {
                warn!(tool = %name, "Model requested an unregistered tool");
                return Observation {
                    tool: name.to_string(),
                    text: format!("Error: Tool '{name}' not found."),
                    success: false,
                    artifact: None,
                };
            }
        };

        match tool.invoke(input).await {
            Ok(output) => {
                debug!(tool = %name, output_len = output.text.len(), "Tool completed");
                Observation {
                    tool: name.to_string(),
                    text: output.text,
                    success: true,
                    artifact: output.artifact,
                }
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                Observation {
                    tool: name.to_string(),
                    text: format!("Tool Error: {e}"),
                    success: false,
                    artifact: None,
                }
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        async fn invoke(&self, input: &str) -> std::result::Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(input))
        }
    }

    fn failing_tool() -> FnTool {
        FnTool::new("explode", "Always fails", |_: &str| -> std::result::Result<String, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "explode".into(),
                reason: "upstream quote service unavailable".into(),
            })
        })
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert!(matches!(registry.try_get("nonexistent"), Err(ToolError::NotFound(_))));
    }

    #[test]
    fn registry_preserves_order_and_replaces_duplicates() {
        let registry = ToolRegistry::from_tools(vec![
            Box::new(EchoTool),
            Box::new(FnTool::new("date", "Today's date", |_: &str| Ok::<_, ToolError>("2024-05-01"))),
            Box::new(FnTool::new("echo", "Replacement", |i: &str| Ok::<_, ToolError>(i.to_uppercase()))),
        ]);
        assert_eq!(registry.names(), vec!["echo", "date"]);
        assert_eq!(registry.descriptions()[0].1, "Replacement");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn invoke_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let obs = registry.invoke("echo", "hello world").await;
        assert!(obs.success);
        assert_eq!(obs.text, "hello world");
    }

    #[tokio::test]
    async fn invoke_missing_tool_returns_error_text() {
        let registry = ToolRegistry::new();
        let obs = registry.invoke("stock_price", "005930").await;
        assert!(!obs.success);
        assert!(obs.text.contains("stock_price"));
        assert_eq!(obs.text, "Error: Tool 'stock_price' not found.");
    }

    #[tokio::test]
    async fn invoke_failing_tool_returns_error_text() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(failing_tool()));

        let obs = registry.invoke("explode", "").await;
        assert!(!obs.success);
        assert!(obs.text.starts_with("Tool Error:"));
        assert!(obs.text.contains("upstream quote service unavailable"));
    }

    #[tokio::test]
    async fn artifact_is_kept_off_the_text() {
        let tool = FnTool::new("retrieve", "Document search", |q: &str| {
            Ok::<_, ToolError>(ToolOutput::with_artifact(
                format!("1 document for {q}"),
                serde_json::json!([{"id": "doc-1"}]),
            ))
        });
        let registry = ToolRegistry::from_tools(vec![Box::new(tool)]);

        let obs = registry.invoke("retrieve", "dividends").await;
        assert_eq!(obs.text, "1 document for dividends");
        assert_eq!(obs.artifact.unwrap()[0]["id"], "doc-1");
    }
}
