//! Agent engine contracts and native execution events.

pub mod agent;

pub use agent::ToolAgent;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ParleyError;
use crate::types::{Message, ModelMessage, TextStreamDelta};

/// Lazy sequence of native execution events.
pub type EngineEventStream = BoxStream<'static, Result<EngineEvent, ParleyError>>;

/// Lazy sequence of model text deltas.
pub type TextDeltaStream = BoxStream<'static, Result<TextStreamDelta, ParleyError>>;

/// Execution events in the shapes engines natively produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Direct completion-model token streaming.
    LlmStream { chunk: String },
    /// Chat-model token streaming.
    ChatModelStream { content: ChunkContent },
    /// A tool invocation started.
    ToolStart {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// A tool invocation finished.
    ToolEnd {
        name: String,
        #[serde(default)]
        output: serde_json::Value,
    },
    /// The execution chain finished with a final output value.
    ChainEnd { output: serde_json::Value },
    /// Anything the engine emitted that has no canonical meaning.
    Unrecognized { kind: String },
}

/// Content of a chat-model chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkContent {
    Text(String),
    Segments(Vec<Segment>),
}

impl ChunkContent {
    /// Concatenated text; segments without text contribute nothing.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Segments(segments) => segments
                .iter()
                .filter_map(|s| s.text.as_deref())
                .collect(),
        }
    }
}

/// One segment of a multi-part chunk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

/// A recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub tool: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
}

/// Result of a non-streaming engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAnswer {
    pub output: String,
    pub steps: Vec<AgentStep>,
}

/// Tool-augmented agent execution.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Run to completion and return the final answer.
    async fn run(&self, history: &[Message], input: &str) -> Result<AgentAnswer, ParleyError>;

    /// Stream native execution events.
    async fn stream_events(
        &self,
        history: &[Message],
        input: &str,
    ) -> Result<EngineEventStream, ParleyError>;
}

/// Bare text generation without tools.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn stream_text(&self, messages: Vec<ModelMessage>) -> Result<TextDeltaStream, ParleyError>;
}

/// Gate consulted before any execution attempt.
pub trait CredentialCheck: Send + Sync {
    fn has_execution_credentials(&self) -> bool;
}

impl CredentialCheck for bool {
    fn has_execution_credentials(&self) -> bool {
        *self
    }
}
