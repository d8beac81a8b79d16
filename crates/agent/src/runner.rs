//! The agent state machine.
//!
//! One turn is a sequence of reasoning cycles:
//!
//! 1. **Before hooks** run against the state (they may halt the turn)
//! 2. **Reason**: the ReAct prompt is rendered and the model called
//! 3. **Parse** the output into a tool call or a final answer
//! 4. **After hooks** run against the state
//! 5. **Act**: on a tool call, the tool runs and the step is recorded,
//!    then back to 1; on a final answer the turn is done
//!
//! The loop always terminates: a final answer, a halting hook, the step
//! ceiling, a call limit, the deadline, or a model failure ends it.
//! `run_turn` never returns an error; failures are folded into the
//! [`TurnResult`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use stockwise_config::AgentConfig;
use stockwise_core::checkpoint::StateStore;
use stockwise_core::error::{MiddlewareError, ProviderError};
use stockwise_core::event::{AgentEvent, TurnObserver};
use stockwise_core::message::{Message, Role};
use stockwise_core::provider::{ModelOptions, Provider, ProviderRequest};
use stockwise_core::state::{AgentOutcome, AgentState, AgentStep};
use stockwise_core::tool::ToolRegistry;
use stockwise_guard::{ChainReport, HookPoint, MiddlewareChain};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::parser::parse;
use crate::prompt::{build_messages, render_react_prompt, DEFAULT_SYSTEM_PROMPT, STOP_SEQUENCE};
use crate::scratchpad::format_steps;

/// Returned when a step ceiling, call limit or deadline ends the turn.
pub const LIMIT_NOTICE: &str = "Agent stopped due to iteration limit or time limit.";

/// Returned when the turn fails.
pub const FAILURE_NOTICE: &str =
    "죄송합니다. 요청을 처리하는 중 문제가 발생했습니다. 잠시 후 다시 시도해 주세요.";

/// Returned when a policy hook removed the model's answer.
pub const WITHHELD_NOTICE: &str = "죄송합니다. 해당 주제에 대해서는 답변드릴 수 없습니다.";

/// Optional per-run caps on model and tool calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLimits {
    pub model_calls_per_run: Option<u32>,
    pub tool_calls_per_run: Option<u32>,
}

/// Per-turn settings.
#[derive(Clone)]
pub struct TurnConfig {
    pub thread_id: String,
    /// Maximum reasoning cycles
    pub max_steps: usize,
    /// Wall-clock budget for the whole turn
    pub deadline: Option<Duration>,
    pub observers: Vec<Arc<dyn TurnObserver>>,
    pub limits: CallLimits,
}

impl TurnConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            max_steps: 25,
            deadline: None,
            observers: Vec::new(),
            limits: CallLimits::default(),
        }
    }

    /// Settings from the `[agent]` config section.
    pub fn from_config(config: &AgentConfig, thread_id: impl Into<String>) -> Self {
        Self {
            max_steps: config.max_steps,
            deadline: config.deadline_secs.map(Duration::from_secs),
            limits: CallLimits {
                model_calls_per_run: config.model_calls_per_run,
                tool_calls_per_run: config.tool_calls_per_run,
            },
            ..Self::new(thread_id)
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_limits(mut self, limits: CallLimits) -> Self {
        self.limits = limits;
        self
    }

    fn emit(&self, event: AgentEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for TurnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnConfig")
            .field("thread_id", &self.thread_id)
            .field("max_steps", &self.max_steps)
            .field("deadline", &self.deadline)
            .field("observers", &self.observers.len())
            .field("limits", &self.limits)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    LimitReached,
    Failed,
}

/// Why a turn failed.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("model call failed: {0}")]
    Model(#[from] ProviderError),

    #[error("middleware failed: {0}")]
    Middleware(#[from] MiddlewareError),
}

impl TurnError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Model(_) => "model",
            Self::Middleware(_) => "middleware",
        }
    }
}

/// Outcome of one turn.
#[derive(Debug)]
pub struct TurnResult {
    /// Text to show the user
    pub final_text: String,
    /// The state after the turn, ready to checkpoint
    pub state: AgentState,
    pub status: TurnStatus,
    /// Set when `status` is [`TurnStatus::Failed`]
    pub error: Option<TurnError>,
    /// Reasoning cycles started
    pub cycles: usize,
}

#[derive(Default)]
struct Progress {
    cycles: usize,
    model_calls: u32,
    tool_calls: u32,
}

enum Ended {
    Answered(String),
    Halted,
    Limit(&'static str),
    Failed(TurnError),
}

/// Runs turns against a model, a tool registry and a middleware chain.
///
/// Cheap to share: every collaborator is behind an `Arc`, and a runner holds
/// no per-thread state, so one runner serves all threads concurrently.
pub struct AgentRunner {
    provider: Arc<dyn Provider>,
    options: ModelOptions,
    tools: Arc<ToolRegistry>,
    middleware: MiddlewareChain,
    system_prompt: String,
}

impl AgentRunner {
    pub fn new(provider: Arc<dyn Provider>, options: ModelOptions, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            options,
            tools,
            middleware: MiddlewareChain::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn middleware(&self) -> &MiddlewareChain {
        &self.middleware
    }

    /// Run one top-level turn.
    ///
    /// `prior` seeds the conversation (usually a checkpoint); without it a
    /// fresh state is created for `config.thread_id`.
    pub async fn run_turn(
        &self,
        prior: Option<AgentState>,
        user_message: &str,
        config: &TurnConfig,
    ) -> TurnResult {
        let mut state = prior.unwrap_or_else(|| AgentState::new(config.thread_id.clone()));
        state.thread_id = config.thread_id.clone();
        state.begin_episode();
        state.push(Message::user(user_message));

        info!(thread_id = %config.thread_id, max_steps = config.max_steps, "Turn started");
        config.emit(AgentEvent::TurnStarted {
            thread_id: config.thread_id.clone(),
            input: user_message.to_string(),
        });

        let mut progress = Progress::default();
        let ended = match config.deadline {
            Some(deadline) => {
                let drive = self.drive(&mut state, user_message, config, &mut progress);
                match tokio::time::timeout(deadline, drive).await {
                    Ok(ended) => ended,
                    Err(_) => Ended::Limit("deadline"),
                }
            }
            None => self.drive(&mut state, user_message, config, &mut progress).await,
        };

        self.finish(state, ended, config, progress.cycles)
    }

    /// Load the thread's checkpoint, run the turn, save the result.
    ///
    /// A checkpoint that cannot be read starts the thread fresh; a failed
    /// save is logged and leaves the turn result untouched.
    pub async fn run_thread(
        &self,
        store: &dyn StateStore,
        user_message: &str,
        config: &TurnConfig,
    ) -> TurnResult {
        let prior = match store.load(&config.thread_id).await {
            Ok(prior) => prior,
            Err(e) => {
                warn!(thread_id = %config.thread_id, error = %e, "Checkpoint unreadable, starting fresh");
                None
            }
        };

        let result = self.run_turn(prior, user_message, config).await;

        if let Err(e) = store.save(&result.state).await {
            error!(thread_id = %config.thread_id, store = store.name(), error = %e, "Failed to save checkpoint");
        }
        result
    }

    async fn drive(
        &self,
        state: &mut AgentState,
        question: &str,
        config: &TurnConfig,
        progress: &mut Progress,
    ) -> Ended {
        let thread_id = config.thread_id.as_str();

        loop {
            if progress.cycles >= config.max_steps {
                return Ended::Limit("step_ceiling");
            }
            progress.cycles += 1;
            let cycle = progress.cycles;
            debug!(thread_id, cycle, steps = state.intermediate_steps.len(), "Cycle started");
            config.emit(AgentEvent::CycleStarted {
                thread_id: thread_id.to_string(),
                cycle,
            });

            // ── Before hooks ──
            match self.run_hooks(HookPoint::BeforeModel, state, config).await {
                Ok(report) if report.halted => return Ended::Halted,
                Ok(_) => {}
                Err(e) => return Ended::Failed(e.into()),
            }

            // ── Reason ──
            if let Some(max) = config.limits.model_calls_per_run {
                if progress.model_calls >= max {
                    return Ended::Limit("model_calls_per_run");
                }
            }
            progress.model_calls += 1;

            let output = match self.call_model(state, question, config, cycle).await {
                Ok(output) => output,
                Err(e) => return Ended::Failed(e.into()),
            };

            let outcome = parse(&output);
            state.outcome = Some(outcome.clone());

            match outcome {
                AgentOutcome::Finish(finish) => {
                    let answer = Message::assistant(finish.output.clone());
                    let answer_id = answer.id.clone();
                    state.push(answer);

                    if let Err(e) = self.run_hooks(HookPoint::AfterModel, state, config).await {
                        return Ended::Failed(e.into());
                    }

                    let text = state
                        .messages
                        .iter()
                        .find(|m| m.id == answer_id)
                        .map(|m| m.content.clone())
                        .unwrap_or_else(|| WITHHELD_NOTICE.to_string());
                    return Ended::Answered(text);
                }
                AgentOutcome::ToolCall(action) => {
                    match self.run_hooks(HookPoint::AfterModel, state, config).await {
                        Ok(report) if report.halted => return Ended::Halted,
                        Ok(_) => {}
                        Err(e) => return Ended::Failed(e.into()),
                    }

                    // ── Act ──
                    if let Some(max) = config.limits.tool_calls_per_run {
                        if progress.tool_calls >= max {
                            return Ended::Limit("tool_calls_per_run");
                        }
                    }
                    progress.tool_calls += 1;

                    debug!(thread_id, cycle, tool = %action.tool, input = %action.tool_input, "Executing tool");
                    config.emit(AgentEvent::ToolCallStarted {
                        thread_id: thread_id.to_string(),
                        cycle,
                        tool: action.tool.clone(),
                        input: action.tool_input.clone(),
                    });

                    let start = Instant::now();
                    let observation = self.tools.invoke(&action.tool, &action.tool_input).await;
                    let duration_ms = start.elapsed().as_millis() as u64;

                    config.emit(if observation.success {
                        AgentEvent::ToolCallFinished {
                            thread_id: thread_id.to_string(),
                            cycle,
                            tool: action.tool.clone(),
                            output: observation.text.clone(),
                            duration_ms,
                        }
                    } else {
                        AgentEvent::ToolCallFailed {
                            thread_id: thread_id.to_string(),
                            cycle,
                            tool: action.tool.clone(),
                            error: observation.text.clone(),
                            duration_ms,
                        }
                    });

                    state.record_step(AgentStep {
                        action,
                        observation: observation.text,
                        artifact: observation.artifact,
                    });
                }
            }
        }
    }

    async fn run_hooks(
        &self,
        point: HookPoint,
        state: &mut AgentState,
        config: &TurnConfig,
    ) -> Result<ChainReport, MiddlewareError> {
        let report = self.middleware.run(point, state).await?;
        let last = report.triggered.len();
        for (i, name) in report.triggered.iter().enumerate() {
            config.emit(AgentEvent::PolicyTriggered {
                thread_id: config.thread_id.clone(),
                middleware: name.clone(),
                halted: report.halted && i + 1 == last,
            });
        }
        Ok(report)
    }

    async fn call_model(
        &self,
        state: &AgentState,
        question: &str,
        config: &TurnConfig,
        cycle: usize,
    ) -> Result<String, ProviderError> {
        // the current question as the hooks left it
        let (question_text, question_id) = match state.last_user_message() {
            Some(m) => (m.content.as_str(), Some(m.id.clone())),
            None => (question, None),
        };
        let scratchpad = format_steps(&state.intermediate_steps);
        let rendered = render_react_prompt(&self.tools, question_text, &scratchpad);

        config.emit(AgentEvent::ModelCallStarted {
            thread_id: config.thread_id.clone(),
            cycle,
            model: self.options.model.clone(),
            input: rendered.clone(),
        });

        let messages = build_messages(&self.system_prompt, &state.messages, question_id.as_ref(), rendered);
        let request = ProviderRequest::new(&self.options, messages).with_stop(vec![STOP_SEQUENCE.to_string()]);

        let start = Instant::now();
        let result = self.provider.complete(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                debug!(
                    thread_id = %config.thread_id,
                    cycle,
                    duration_ms,
                    tokens = response.usage.as_ref().map(|u| u.total_tokens),
                    "Model responded"
                );
                config.emit(AgentEvent::ModelCallFinished {
                    thread_id: config.thread_id.clone(),
                    cycle,
                    model: response.model.clone(),
                    output: response.content.clone(),
                    duration_ms,
                });
                Ok(response.content)
            }
            Err(e) => {
                config.emit(AgentEvent::ModelCallFailed {
                    thread_id: config.thread_id.clone(),
                    cycle,
                    model: self.options.model.clone(),
                    error: e.to_string(),
                    duration_ms,
                });
                Err(e)
            }
        }
    }

    fn finish(&self, state: AgentState, ended: Ended, config: &TurnConfig, cycles: usize) -> TurnResult {
        let thread_id = config.thread_id.clone();
        let (final_text, status, error) = match ended {
            Ended::Answered(text) => (text, TurnStatus::Completed, None),
            Ended::Halted => {
                let text = state
                    .last_message()
                    .filter(|m| m.role == Role::Assistant)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                (text, TurnStatus::Completed, None)
            }
            Ended::Limit(limit) => {
                warn!(thread_id = %thread_id, cycles, limit, "Turn stopped by limit");
                config.emit(AgentEvent::LimitReached {
                    thread_id: thread_id.clone(),
                    cycles,
                    limit: limit.to_string(),
                });
                (LIMIT_NOTICE.to_string(), TurnStatus::LimitReached, None)
            }
            Ended::Failed(e) => {
                error!(thread_id = %thread_id, cycles, kind = e.kind(), error = %e, "Turn failed");
                config.emit(AgentEvent::TurnFailed {
                    thread_id: thread_id.clone(),
                    error: e.to_string(),
                });
                (FAILURE_NOTICE.to_string(), TurnStatus::Failed, Some(e))
            }
        };

        if status == TurnStatus::Completed {
            info!(thread_id = %thread_id, cycles, steps = state.intermediate_steps.len(), "Turn completed");
            config.emit(AgentEvent::FinalAnswer {
                thread_id,
                cycles,
                output: final_text.clone(),
            });
        }

        TurnResult {
            final_text,
            state,
            status,
            error,
            cycles,
        }
    }
}
