//! Shared test helpers: scripted engine, scripted model, failing store.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use parley::engine::{
    AgentAnswer, AgentEngine, ChunkContent, EngineEvent, EngineEventStream, TextDeltaStream,
    TextModel,
};
use parley::error::ParleyError;
use parley::protocol::{FrameParser, ParsedFrame};
use parley::server::{ChatRequest, OrchestratorSettings, SessionOutcome, StreamOrchestrator};
use parley::store::{MemoryStore, ThreadStore};
use parley::types::{Message, ModelMessage, Role, TextStreamDelta, Thread};

/// Engine that replays a fixed list of events.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    events: Vec<Result<EngineEvent, String>>,
    fail_to_start: Option<String>,
    hang: bool,
    answer: Option<AgentAnswer>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chat-model token events, one per piece.
    pub fn tokens(pieces: &[&str]) -> Self {
        let mut engine = Self::new();
        for piece in pieces {
            engine = engine.event(chat_chunk(piece));
        }
        engine
    }

    pub fn event(mut self, event: EngineEvent) -> Self {
        self.events.push(Ok(event));
        self
    }

    /// Fail mid-stream after the events queued so far.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.events.push(Err(message.to_string()));
        self
    }

    /// Never end after the queued events.
    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Fail before producing a stream.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_to_start: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_answer(mut self, answer: AgentAnswer) -> Self {
        self.answer = Some(answer);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentEngine for ScriptedEngine {
    async fn run(&self, _history: &[Message], _input: &str) -> Result<AgentAnswer, ParleyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_to_start {
            return Err(ParleyError::Stream(message.clone()));
        }
        self.answer
            .clone()
            .ok_or_else(|| ParleyError::Stream("no scripted answer".into()))
    }

    async fn stream_events(
        &self,
        _history: &[Message],
        _input: &str,
    ) -> Result<EngineEventStream, ParleyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_to_start {
            return Err(ParleyError::Stream(message.clone()));
        }
        let events = stream::iter(
            self.events
                .clone()
                .into_iter()
                .map(|event| event.map_err(ParleyError::Stream)),
        );
        if self.hang {
            Ok(events.chain(stream::pending()).boxed())
        } else {
            Ok(events.boxed())
        }
    }
}

/// Text model that replays fixed deltas and records what it was asked.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    deltas: Vec<Result<String, String>>,
    fail_to_start: Option<String>,
    requests: Arc<Mutex<Vec<Vec<ModelMessage>>>>,
}

impl ScriptedModel {
    pub fn new(pieces: &[&str]) -> Self {
        Self {
            deltas: pieces.iter().map(|p| Ok(p.to_string())).collect(),
            ..Self::default()
        }
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.deltas.push(Err(message.to_string()));
        self
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_to_start: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Message lists received, one per call.
    pub fn requests(&self) -> Vec<Vec<ModelMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn stream_text(&self, messages: Vec<ModelMessage>) -> Result<TextDeltaStream, ParleyError> {
        self.requests.lock().unwrap().push(messages);
        if let Some(message) = &self.fail_to_start {
            return Err(ParleyError::Stream(message.clone()));
        }
        let deltas = self
            .deltas
            .clone()
            .into_iter()
            .map(|delta| delta.map(TextStreamDelta::text).map_err(ParleyError::Stream))
            .chain(std::iter::once(Ok(TextStreamDelta::done(None))));
        Ok(stream::iter(deltas).boxed())
    }
}

/// Memory store whose assistant appends always fail.
#[derive(Default)]
pub struct FailingAssistantStore {
    inner: MemoryStore,
}

#[async_trait]
impl ThreadStore for FailingAssistantStore {
    async fn find_thread(&self, id: &str) -> Result<Option<Thread>, ParleyError> {
        self.inner.find_thread(id).await
    }

    async fn create_thread(&self, title: &str) -> Result<Thread, ParleyError> {
        self.inner.create_thread(title).await
    }

    async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<Message, ParleyError> {
        if role == Role::Assistant {
            return Err(ParleyError::Persistence("disk full".into()));
        }
        self.inner.append_message(thread_id, role, content, meta).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ParleyError> {
        self.inner.list_messages(thread_id).await
    }
}

pub fn chat_chunk(text: &str) -> EngineEvent {
    EngineEvent::ChatModelStream {
        content: ChunkContent::Text(text.to_string()),
    }
}

/// Settings with no synthesis pacing.
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings::builder()
        .synth_delay(Duration::ZERO)
        .build()
}

pub fn orchestrator(
    store: Arc<dyn ThreadStore>,
    engine: ScriptedEngine,
    model: ScriptedModel,
    credentials: bool,
) -> StreamOrchestrator {
    StreamOrchestrator::new(
        store,
        Arc::new(engine),
        Arc::new(model),
        Arc::new(credentials),
        fast_settings(),
    )
}

/// Decode a complete response body.
pub fn parse_frames(bytes: &[u8]) -> Vec<ParsedFrame> {
    let mut parser = FrameParser::new();
    let frames = parser.push(bytes);
    assert_eq!(parser.finish(), 0, "body ended inside a frame");
    frames
}

/// Run one streaming turn to completion.
pub async fn run_turn(
    orchestrator: &StreamOrchestrator,
    message: &str,
    thread_id: Option<&str>,
) -> (Vec<ParsedFrame>, SessionOutcome) {
    let request = ChatRequest::new(message, thread_id.map(str::to_string));
    let handle = orchestrator.stream(request).await.expect("turn prepared");
    let (bytes, outcome) = handle.collect().await.expect("session finished");
    (parse_frames(&bytes), outcome)
}

/// Event names in order.
pub fn events(frames: &[ParsedFrame]) -> Vec<&str> {
    frames.iter().map(|f| f.event.as_str()).collect()
}

/// Concatenated token text.
pub fn token_text(frames: &[ParsedFrame]) -> String {
    frames
        .iter()
        .filter(|f| f.event == "token")
        .map(|f| f.data.as_str())
        .collect()
}
