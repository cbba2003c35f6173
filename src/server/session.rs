//! Per-request session state.

use serde_json::Value;
use strum::{AsRefStr, Display};

use crate::engine::{AgentStep, EngineEvent};

/// Orchestrator state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SessionPhase {
    Init,
    ResolvingThread,
    PersistUserMessage,
    PrimaryExecution,
    Streaming,
    FallbackExecution,
    Finalizing,
    Closed,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TerminalKind {
    /// `done` was the last frame.
    Done,
    /// Both attempts failed without output; the fallback `error` was last.
    Failed,
    /// The client went away; no terminal frame was written.
    Cancelled,
    /// Execution credentials were missing; the configuration `error` was last.
    Misconfigured,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub thread_id: String,
    pub assistant_text: String,
    pub used_fallback: bool,
    pub terminal: TerminalKind,
    /// Id of the persisted assistant message, if one was written.
    pub assistant_message_id: Option<String>,
    /// Failure recorded while persisting the assistant message.
    pub persistence_error: Option<String>,
}

/// Mutable state owned by one in-flight request.
#[derive(Debug, Clone, Default)]
pub struct StreamSession {
    thread_id: String,
    buffer: String,
    used_fallback: bool,
    steps: Vec<AgentStep>,
    pending_tools: Vec<(String, Value)>,
}

impl StreamSession {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Self::default()
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Assistant text emitted so far. Only ever grows.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn append(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    pub fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    pub fn mark_fallback(&mut self) {
        self.used_fallback = true;
    }

    /// Track tool invocations for the assistant message meta.
    pub fn record(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::ToolStart { name, input } => {
                self.pending_tools.push((name.clone(), input.clone()));
            }
            EngineEvent::ToolEnd { name, output } => {
                let input = self
                    .pending_tools
                    .iter()
                    .position(|(pending, _)| pending == name)
                    .map(|i| self.pending_tools.remove(i).1)
                    .unwrap_or(Value::Null);
                self.steps.push(AgentStep {
                    tool: name.clone(),
                    input,
                    output: output.clone(),
                });
            }
            _ => {}
        }
    }

    pub fn steps(&self) -> &[AgentStep] {
        &self.steps
    }

    /// Meta stored with the assistant message: recorded steps, when any.
    pub fn meta(&self) -> Option<Value> {
        if self.steps.is_empty() {
            return None;
        }
        serde_json::to_value(&self.steps).ok()
    }

    pub fn outcome(&self, terminal: TerminalKind) -> SessionOutcome {
        SessionOutcome {
            thread_id: self.thread_id.clone(),
            assistant_text: self.buffer.clone(),
            used_fallback: self.used_fallback,
            terminal,
            assistant_message_id: None,
            persistence_error: None,
        }
    }
}
