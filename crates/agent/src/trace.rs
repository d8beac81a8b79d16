//! Run traces: one record per model call and per tool call.
//!
//! [`TraceRecorder`] is a [`TurnObserver`] that pairs the start and end
//! events of each call into a [`RunTrace`]. Records stay in memory; a
//! caller that wants them in a database drains them after the turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use stockwise_core::event::{AgentEvent, TurnObserver};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Model,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// One model or tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    pub id: Uuid,
    pub thread_id: String,
    pub kind: RunKind,
    /// Model id or tool name
    pub name: String,
    pub input: String,
    pub output: Option<String>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

type OpenKey = (String, usize, RunKind);

#[derive(Default)]
struct Inner {
    traces: Vec<RunTrace>,
    // index into `traces` of each call that has started but not ended
    open: HashMap<OpenKey, usize>,
}

/// Collects [`RunTrace`]s from loop events.
#[derive(Default)]
pub struct TraceRecorder {
    inner: Mutex<Inner>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // poisoning only means another observer panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All traces so far, in start order.
    pub fn traces(&self) -> Vec<RunTrace> {
        self.lock().traces.clone()
    }

    pub fn traces_for(&self, thread_id: &str) -> Vec<RunTrace> {
        self.lock()
            .traces
            .iter()
            .filter(|t| t.thread_id == thread_id)
            .cloned()
            .collect()
    }

    /// Take every trace out of the recorder.
    pub fn drain(&self) -> Vec<RunTrace> {
        let mut inner = self.lock();
        inner.open.clear();
        std::mem::take(&mut inner.traces)
    }

    fn start(&self, thread_id: &str, cycle: usize, kind: RunKind, name: &str, input: &str) {
        let mut inner = self.lock();
        let index = inner.traces.len();
        inner.traces.push(RunTrace {
            id: Uuid::new_v4(),
            thread_id: thread_id.to_string(),
            kind,
            name: name.to_string(),
            input: input.to_string(),
            output: None,
            status: RunStatus::Running,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
        });
        inner.open.insert((thread_id.to_string(), cycle, kind), index);
    }

    fn end(&self, thread_id: &str, cycle: usize, kind: RunKind, result: Result<&str, &str>, duration_ms: u64) {
        let mut inner = self.lock();
        let Some(index) = inner.open.remove(&(thread_id.to_string(), cycle, kind)) else {
            return;
        };
        let Some(trace) = inner.traces.get_mut(index) else {
            return;
        };
        match result {
            Ok(output) => {
                trace.status = RunStatus::Succeeded;
                trace.output = Some(output.to_string());
            }
            Err(error) => {
                trace.status = RunStatus::Failed;
                trace.error = Some(error.to_string());
            }
        }
        trace.ended_at = Some(Utc::now());
        trace.duration_ms = Some(duration_ms);
    }
}

impl TurnObserver for TraceRecorder {
    fn on_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::ModelCallStarted { thread_id, cycle, model, input } => {
                self.start(thread_id, *cycle, RunKind::Model, model, input);
            }
            AgentEvent::ModelCallFinished { thread_id, cycle, output, duration_ms, .. } => {
                self.end(thread_id, *cycle, RunKind::Model, Ok(output.as_str()), *duration_ms);
            }
            AgentEvent::ModelCallFailed { thread_id, cycle, error, duration_ms, .. } => {
                self.end(thread_id, *cycle, RunKind::Model, Err(error.as_str()), *duration_ms);
            }
            AgentEvent::ToolCallStarted { thread_id, cycle, tool, input } => {
                self.start(thread_id, *cycle, RunKind::Tool, tool, input);
            }
            AgentEvent::ToolCallFinished { thread_id, cycle, output, duration_ms, .. } => {
                self.end(thread_id, *cycle, RunKind::Tool, Ok(output.as_str()), *duration_ms);
            }
            AgentEvent::ToolCallFailed { thread_id, cycle, error, duration_ms, .. } => {
                self.end(thread_id, *cycle, RunKind::Tool, Err(error.as_str()), *duration_ms);
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRecorder")
            .field("traces", &self.lock().traces.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_start_and_end_events() {
        let recorder = TraceRecorder::new();
        recorder.on_event(&AgentEvent::ModelCallStarted {
            thread_id: "t".into(),
            cycle: 1,
            model: "gpt-4o-mini".into(),
            input: "Question: date?".into(),
        });
        recorder.on_event(&AgentEvent::ModelCallFinished {
            thread_id: "t".into(),
            cycle: 1,
            model: "gpt-4o-mini".into(),
            output: "Action: get_current_date".into(),
            duration_ms: 120,
        });
        recorder.on_event(&AgentEvent::ToolCallStarted {
            thread_id: "t".into(),
            cycle: 1,
            tool: "explode".into(),
            input: "".into(),
        });
        recorder.on_event(&AgentEvent::ToolCallFailed {
            thread_id: "t".into(),
            cycle: 1,
            tool: "explode".into(),
            error: "Tool Error: boom".into(),
            duration_ms: 2,
        });

        let traces = recorder.traces();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].kind, RunKind::Model);
        assert_eq!(traces[0].status, RunStatus::Succeeded);
        assert_eq!(traces[0].input, "Question: date?");
        assert_eq!(traces[0].output.as_deref(), Some("Action: get_current_date"));
        assert_eq!(traces[0].duration_ms, Some(120));
        assert!(traces[0].ended_at.is_some());

        assert_eq!(traces[1].kind, RunKind::Tool);
        assert_eq!(traces[1].status, RunStatus::Failed);
        assert_eq!(traces[1].error.as_deref(), Some("Tool Error: boom"));
    }

    #[test]
    fn unmatched_end_is_ignored_and_threads_are_separate() {
        let recorder = TraceRecorder::new();
        recorder.on_event(&AgentEvent::ToolCallFinished {
            thread_id: "t".into(),
            cycle: 9,
            tool: "x".into(),
            output: "y".into(),
            duration_ms: 1,
        });
        assert!(recorder.traces().is_empty());

        for thread in ["a", "b"] {
            recorder.on_event(&AgentEvent::ToolCallStarted {
                thread_id: thread.into(),
                cycle: 1,
                tool: "search".into(),
                input: thread.into(),
            });
        }
        assert_eq!(recorder.traces_for("a").len(), 1);
        assert_eq!(recorder.traces_for("b")[0].status, RunStatus::Running);

        assert_eq!(recorder.drain().len(), 2);
        assert!(recorder.traces().is_empty());
    }
}
