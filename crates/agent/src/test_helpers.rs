//! Shared test helpers for runner tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stockwise_core::error::{ProviderError, ToolError};
use stockwise_core::event::{AgentEvent, TurnObserver};
use stockwise_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use stockwise_core::tool::{FnTool, ToolRegistry};

/// A mock provider that replays scripted outputs.
///
/// Once the script runs out it repeats the fallback, or fails with an API
/// error when there is none. Every request is kept for inspection.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(outputs: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self::build(outputs.into_iter().map(|s| Ok(s.into())).collect(), None))
    }

    /// Returns `output` forever.
    pub fn repeating(output: &str) -> Arc<Self> {
        Arc::new(Self::build(VecDeque::new(), Some(output.to_string())))
    }

    pub fn failing(error: ProviderError) -> Arc<Self> {
        Arc::new(Self::build(VecDeque::from([Err(error)]), None))
    }

    /// Sleep before every response.
    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        let mut inner = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("provider already shared"));
        inner.delay = Some(delay);
        Arc::new(inner)
    }

    fn build(script: VecDeque<Result<String, ProviderError>>, fallback: Option<String>) -> Self {
        Self {
            script: Mutex::new(script),
            fallback,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let content = match (next, &self.fallback) {
            (Some(result), _) => result?,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => {
                return Err(ProviderError::ApiError {
                    status_code: 400,
                    message: "script exhausted".into(),
                });
            }
        };

        Ok(ProviderResponse {
            content,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model,
            metadata: Default::default(),
        })
    }
}

/// A registry with a fixed-date `get_current_date` tool.
pub fn date_registry() -> ToolRegistry {
    ToolRegistry::from_tools(vec![Box::new(FnTool::new(
        "get_current_date",
        "오늘 날짜를 알려줍니다.",
        |_: &str| Ok::<_, ToolError>("2024-05-01 Wednesday"),
    ))])
}

/// Records every event it sees.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<AgentEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    /// The `event` tag of each event, in order.
    pub fn names(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .filter_map(|v| v.get("event").and_then(|n| n.as_str()).map(str::to_string))
            .collect()
    }

    pub fn contains_limit(&self, limit: &str) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, AgentEvent::LimitReached { limit: l, .. } if l == limit))
    }
}

impl TurnObserver for EventLog {
    fn on_event(&self, event: &AgentEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
