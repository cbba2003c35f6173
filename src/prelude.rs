//! Convenience re-exports for common use.

pub use crate::client::{CancelHandle, ChatClient, ChatStream};
pub use crate::config::ParleyConfig;
pub use crate::engine::{AgentAnswer, AgentEngine, AgentStep, CredentialCheck, EngineEvent, TextModel};
pub use crate::error::{ParleyError, Result};
pub use crate::protocol::{Frame, FrameEvent, FrameHandler, FrameParser, ParsedFrame, Transcript};
pub use crate::provider::ModelProvider;
pub use crate::server::{
    AppState, ChatRequest, FallbackPolicy, OrchestratorSettings, SessionOutcome, StreamOrchestrator,
    TerminalKind,
};
pub use crate::store::{FileStore, MemoryStore, ThreadStore};
pub use crate::tools::{AgentTool, AgentToolParameters, Tool, ToolArguments};
pub use crate::types::{GenerationSettings, Message, ModelMessage, Role, TextStreamDelta, Thread};
