//! Per-request streaming state machine.
//!
//! A turn is prepared (thread resolved, user message persisted, history
//! loaded) before the response starts, so preparation failures surface as
//! HTTP errors. The session itself runs on its own task and only ever
//! reports through frames.

use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::fallback::{fallback_error_message, fallback_events, FallbackPolicy, FALLBACK_WARNING};
use super::keepalive::{KeepAlive, DEFAULT_KEEPALIVE_INTERVAL};
use super::session::{SessionOutcome, SessionPhase, StreamSession, TerminalKind};
use super::writer::FrameWriter;
use crate::engine::{AgentEngine, AgentStep, CredentialCheck, EngineEventStream, TextModel};
use crate::error::ParleyError;
use crate::protocol::Frame;
use crate::store::{ThreadStore, DEFAULT_THREAD_TITLE};
use crate::translate::{EventTranslator, DEFAULT_SYNTH_CHUNK_CHARS, DEFAULT_SYNTH_DELAY};
use crate::types::{Message, Role};

/// Error frame message when execution credentials are missing.
pub const MISSING_CREDENTIALS: &str = "Missing OPENAI_API_KEY";

/// Tunables for streaming sessions.
#[derive(Debug, Clone, Builder)]
pub struct OrchestratorSettings {
    #[builder(default = DEFAULT_KEEPALIVE_INTERVAL)]
    pub keepalive_interval: Duration,
    #[builder(default = DEFAULT_SYNTH_CHUNK_CHARS)]
    pub synth_chunk_chars: usize,
    #[builder(default = DEFAULT_SYNTH_DELAY)]
    pub synth_delay: Duration,
    #[builder(default)]
    pub fallback_policy: FallbackPolicy,
    /// Frames buffered between the session task and the response body.
    #[builder(default = 32)]
    pub channel_capacity: usize,
    #[builder(default = DEFAULT_THREAD_TITLE.to_string(), into)]
    pub thread_title: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Body of a chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub message: String,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            thread_id,
            message: message.into(),
        }
    }

    /// Parse a raw request body.
    ///
    /// `message` must be a non-empty string; an empty or non-string
    /// `threadId` is treated as absent.
    pub fn parse(body: &[u8]) -> Result<Self, ParleyError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| message_required())?;
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .ok_or_else(message_required)?;
        let thread_id = value
            .get("threadId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        Ok(Self::new(message, thread_id))
    }

    pub fn validate(&self) -> Result<(), ParleyError> {
        if self.message.is_empty() {
            return Err(message_required());
        }
        Ok(())
    }
}

fn message_required() -> ParleyError {
    ParleyError::Validation("message is required".into())
}

/// A turn ready for execution.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    pub thread_id: String,
    pub message: String,
    /// Stored messages in ascending order, including the new user message.
    pub history: Vec<Message>,
    /// Whether the thread was created for this turn.
    pub created_thread: bool,
}

/// Reply of a non-streaming turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub thread_id: String,
    pub output: String,
    pub steps: Vec<AgentStep>,
}

/// A running streaming session.
pub struct SessionHandle {
    pub thread_id: String,
    /// Encoded frames and pings, in write order.
    pub receiver: mpsc::Receiver<Bytes>,
    /// Cancelling aborts the session as if the client disconnected.
    pub cancel: CancellationToken,
    pub join: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    /// Response body stream; dropping it cancels the session.
    pub fn into_body(self) -> ReceiverStream<Bytes> {
        ReceiverStream::new(self.receiver)
    }

    /// Drain every byte the session writes, then wait for its outcome.
    pub async fn collect(mut self) -> Result<(Vec<u8>, SessionOutcome), ParleyError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.receiver.recv().await {
            bytes.extend_from_slice(&chunk);
        }
        let outcome = self
            .join
            .await
            .map_err(|e| ParleyError::Stream(format!("session task failed: {e}")))?;
        Ok((bytes, outcome))
    }
}

/// Outcome of pumping one event stream.
enum Flow {
    Completed,
    Cancelled,
}

/// Drives chat turns against the store, the engine and the fallback model.
#[derive(Clone)]
pub struct StreamOrchestrator {
    store: Arc<dyn ThreadStore>,
    engine: Arc<dyn AgentEngine>,
    fallback: Arc<dyn TextModel>,
    credentials: Arc<dyn CredentialCheck>,
    settings: OrchestratorSettings,
}

impl StreamOrchestrator {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        engine: Arc<dyn AgentEngine>,
        fallback: Arc<dyn TextModel>,
        credentials: Arc<dyn CredentialCheck>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            engine,
            fallback,
            credentials,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Resolve the thread, persist the user message and load history.
    pub async fn prepare(&self, request: ChatRequest) -> Result<PreparedTurn, ParleyError> {
        debug!(phase = %SessionPhase::Init, "session phase");
        request.validate()?;
        debug!(phase = %SessionPhase::ResolvingThread, thread_id = ?request.thread_id, "session phase");

        let existing = match request.thread_id.as_deref() {
            Some(id) => self.store.find_thread(id).await?,
            None => None,
        };
        let (thread, created_thread) = match existing {
            Some(thread) => (thread, false),
            None => (self.store.create_thread(&self.settings.thread_title).await?, true),
        };

        debug!(phase = %SessionPhase::PersistUserMessage, thread_id = %thread.id, "session phase");
        self.store
            .append_message(&thread.id, Role::User, &request.message, None)
            .await?;
        let history = self.store.list_messages(&thread.id).await?;

        Ok(PreparedTurn {
            thread_id: thread.id,
            message: request.message,
            history,
            created_thread,
        })
    }

    /// Spawn the session for a prepared turn.
    pub fn start(&self, turn: PreparedTurn) -> SessionHandle {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let thread_id = turn.thread_id.clone();
        let orchestrator = self.clone();
        let session_cancel = cancel.clone();
        let join = tokio::spawn(async move { orchestrator.run_session(turn, tx, session_cancel).await });
        SessionHandle {
            thread_id,
            receiver: rx,
            cancel,
            join,
        }
    }

    /// Prepare and start in one step.
    pub async fn stream(&self, request: ChatRequest) -> Result<SessionHandle, ParleyError> {
        let turn = self.prepare(request).await?;
        Ok(self.start(turn))
    }

    /// Run a session to completion, writing frames into `sender`.
    pub async fn run_session(
        &self,
        turn: PreparedTurn,
        sender: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> SessionOutcome {
        let finished = CancellationToken::new();
        spawn_disconnect_watch(sender.clone(), cancel.clone(), finished.clone());

        let writer = Arc::new(FrameWriter::new(sender, cancel.clone()));
        let keepalive = KeepAlive::spawn(Arc::clone(&writer), self.settings.keepalive_interval);

        let mut driver = SessionDriver {
            writer: Arc::clone(&writer),
            cancel,
            translator: EventTranslator::new(
                self.settings.synth_chunk_chars,
                self.settings.synth_delay,
            ),
            session: StreamSession::new(turn.thread_id.clone()),
        };
        let outcome = self.drive(&mut driver, &turn).await;

        keepalive.cancel().await;
        writer.close().await;
        finished.cancel();
        driver.phase(SessionPhase::Closed);
        info!(
            thread_id = %outcome.thread_id,
            terminal = %outcome.terminal,
            used_fallback = outcome.used_fallback,
            chars = outcome.assistant_text.chars().count(),
            "stream session closed"
        );
        outcome
    }

    async fn drive(&self, driver: &mut SessionDriver, turn: &PreparedTurn) -> SessionOutcome {
        if !self.credentials.has_execution_credentials() {
            warn!(thread_id = %turn.thread_id, "execution credentials missing");
            driver.emit(Frame::error(MISSING_CREDENTIALS, None)).await;
            return driver.session.outcome(TerminalKind::Misconfigured);
        }

        driver.phase(SessionPhase::PrimaryExecution);
        let primary = match self.engine.stream_events(&turn.history, &turn.message).await {
            Ok(events) => {
                driver.phase(SessionPhase::Streaming);
                driver.pump(events).await
            }
            Err(err) => Err(err),
        };

        let primary_error = match primary {
            Ok(Flow::Completed) => return self.finalize(driver, TerminalKind::Done).await,
            Ok(Flow::Cancelled) => return self.finalize(driver, TerminalKind::Cancelled).await,
            Err(err) => err,
        };

        error!(thread_id = %turn.thread_id, error = %primary_error, "agent stream failed");
        driver.session.mark_fallback();
        let warned = driver
            .emit(Frame::warn(FALLBACK_WARNING, Some(primary_error.to_string())))
            .await;
        if !warned {
            return self.finalize(driver, TerminalKind::Cancelled).await;
        }

        driver.phase(SessionPhase::FallbackExecution);
        let messages = self
            .settings
            .fallback_policy
            .messages(&turn.history, &turn.message);
        let fallback = match self.fallback.stream_text(messages).await {
            Ok(deltas) => driver.pump(fallback_events(deltas)).await,
            Err(err) => Err(err),
        };

        match fallback {
            Ok(Flow::Completed) => self.finalize(driver, TerminalKind::Done).await,
            Ok(Flow::Cancelled) => self.finalize(driver, TerminalKind::Cancelled).await,
            Err(err) => {
                let err = ParleyError::FallbackExecution(fallback_error_message(&err));
                error!(thread_id = %turn.thread_id, error = %err, "fallback stream failed");
                let frame = Frame::error(err.to_string(), Some(&turn.thread_id));
                if !driver.emit(frame).await {
                    return self.finalize(driver, TerminalKind::Cancelled).await;
                }
                if driver.session.buffer().is_empty() {
                    driver.phase(SessionPhase::Finalizing);
                    driver.session.outcome(TerminalKind::Failed)
                } else {
                    self.finalize(driver, TerminalKind::Done).await
                }
            }
        }
    }

    /// Persist the assistant message when there is text, then write `done`
    /// unless the session was cancelled.
    async fn finalize(&self, driver: &mut SessionDriver, terminal: TerminalKind) -> SessionOutcome {
        driver.phase(SessionPhase::Finalizing);
        let mut outcome = driver.session.outcome(terminal);

        if !driver.session.buffer().is_empty() {
            let persisted = self
                .store
                .append_message(
                    driver.session.thread_id(),
                    Role::Assistant,
                    driver.session.buffer(),
                    driver.session.meta(),
                )
                .await;
            match persisted {
                Ok(message) => outcome.assistant_message_id = Some(message.id),
                Err(err) => {
                    error!(
                        thread_id = %driver.session.thread_id(),
                        error = %err,
                        "failed to persist assistant message"
                    );
                    outcome.persistence_error = Some(err.to_string());
                }
            }
        }

        if terminal == TerminalKind::Done {
            let done = Frame::done(driver.session.thread_id());
            if !driver.emit(done).await {
                outcome.terminal = TerminalKind::Cancelled;
            }
        }
        outcome
    }

    /// Run a turn without streaming.
    pub async fn complete(&self, request: ChatRequest) -> Result<ChatReply, ParleyError> {
        let turn = self.prepare(request).await?;
        if !self.credentials.has_execution_credentials() {
            return Err(ParleyError::Configuration(MISSING_CREDENTIALS.into()));
        }
        let answer = self
            .engine
            .run(&turn.history, &turn.message)
            .await
            .map_err(|e| ParleyError::PrimaryExecution(e.to_string()))?;

        let meta = if answer.steps.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&answer.steps)?)
        };
        self.store
            .append_message(&turn.thread_id, Role::Assistant, &answer.output, meta)
            .await?;

        Ok(ChatReply {
            thread_id: turn.thread_id,
            output: answer.output,
            steps: answer.steps,
        })
    }
}

/// Cancel `cancel` once the receiving side of `sender` is gone; stop
/// watching when the session finishes.
fn spawn_disconnect_watch(
    sender: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    finished: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = sender.closed() => {
                debug!("client disconnected");
                cancel.cancel();
            }
            _ = finished.cancelled() => {}
            _ = cancel.cancelled() => {}
        }
    });
}

struct SessionDriver {
    writer: Arc<FrameWriter>,
    cancel: CancellationToken,
    translator: EventTranslator,
    session: StreamSession,
}

impl SessionDriver {
    fn phase(&self, phase: SessionPhase) {
        debug!(thread_id = %self.session.thread_id(), phase = %phase, "session phase");
    }

    /// Write one frame; false when cancelled or the writer is closed.
    async fn emit(&mut self, frame: Frame) -> bool {
        let written = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            written = self.writer.write_frame(&frame) => written,
        };
        if !written {
            return false;
        }
        if let Some(text) = frame.token_text() {
            self.session.append(text);
        }
        true
    }

    /// Translate and write every event until the stream ends, fails, or the
    /// session is cancelled.
    async fn pump(&mut self, mut events: EngineEventStream) -> Result<Flow, ParleyError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Flow::Cancelled),
                next = events.next() => next,
            };
            let event = match next {
                None => return Ok(Flow::Completed),
                Some(Err(err)) => return Err(err),
                Some(Ok(event)) => event,
            };

            let buffer_is_empty = self.session.buffer().is_empty();
            let recorded = event.clone();
            let translation = match self.translator.translate(event, buffer_is_empty) {
                Ok(translation) => translation,
                Err(err) => {
                    debug!(thread_id = %self.session.thread_id(), error = %err, "dropping engine event");
                    continue;
                }
            };
            self.session.record(&recorded);

            for frame in translation.frames {
                if !self.emit(frame).await {
                    return Ok(Flow::Cancelled);
                }
                if let Some(delay) = translation.pacing {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parsing() {
        let request = ChatRequest::parse(br#"{"message":"  hi ","threadId":"t-1"}"#).unwrap();
        assert_eq!(request, ChatRequest::new("  hi ", Some("t-1".into())));

        let request = ChatRequest::parse(br#"{"message":"hi","threadId":""}"#).unwrap();
        assert_eq!(request.thread_id, None);

        let invalid: [&[u8]; 4] = [br#"{"message":""}"#, br#"{"message":3}"#, b"{}", b"not json"];
        for body in invalid {
            let err = ChatRequest::parse(body).unwrap_err();
            assert!(matches!(err, ParleyError::Validation(ref m) if m == "message is required"));
        }
    }

    #[test]
    fn settings_defaults() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.keepalive_interval, Duration::from_secs(15));
        assert_eq!(settings.synth_chunk_chars, 24);
        assert_eq!(settings.synth_delay, Duration::from_millis(10));
        assert_eq!(settings.fallback_policy, FallbackPolicy::CurrentMessageOnly);
        assert_eq!(settings.thread_title, "New conversation");

        let custom = OrchestratorSettings::builder()
            .synth_chunk_chars(4)
            .thread_title("Support")
            .build();
        assert_eq!(custom.synth_chunk_chars, 4);
        assert_eq!(custom.thread_title, "Support");
    }
}
