//! HTTP client for the streaming chat endpoint.
//!
//! Each turn gets a fresh [`FrameParser`] (through [`frame_stream`]) and a
//! fresh [`Transcript`]. The client remembers the thread id announced by the
//! server so the next turn continues the same conversation.

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ParleyError;
use crate::protocol::{frame_stream, FrameHandler, ParsedFrame, Transcript};
use crate::provider::http::shared_client;
use crate::server::http::CHAT_STREAM_PATH;
use crate::server::ChatRequest;

/// Multi-turn client for one conversation.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    http: reqwest::Client,
    thread_id: Option<String>,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: shared_client().clone(),
            thread_id: None,
        }
    }

    /// Continue an existing thread.
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Open a stream for one turn.
    pub async fn start(&self, message: &str) -> Result<ChatStream, ParleyError> {
        let url = format!("{}{}", self.base_url, CHAT_STREAM_PATH);
        let body = ChatRequest::new(message, self.thread_id.clone());
        debug!(url = %url, thread_id = ?self.thread_id, "opening chat stream");

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(response_error(status.as_u16(), &text));
        }

        Ok(ChatStream {
            frames: Box::pin(frame_stream(resp.bytes_stream())),
            cancel: CancellationToken::new(),
            transcript: Transcript::new(),
        })
    }

    /// Run one turn to the end and remember the thread id it reports.
    pub async fn converse(&mut self, message: &str) -> Result<Transcript, ParleyError> {
        let transcript = self.start(message).await?.collect().await?;
        if let Some(id) = transcript.thread_id() {
            self.thread_id = Some(id.to_string());
        }
        Ok(transcript)
    }
}

/// `{ "error": "..." }` bodies become the error message.
fn response_error(status: u16, body: &str) -> ParleyError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    match status {
        400 => ParleyError::Validation(message),
        404 => ParleyError::NotFound(message),
        _ => ParleyError::api(status, message),
    }
}

/// Frames of one streaming response.
pub struct ChatStream {
    frames: BoxStream<'static, Result<ParsedFrame, ParleyError>>,
    cancel: CancellationToken,
    transcript: Transcript,
}

impl ChatStream {
    /// Handle that cancels this stream from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Stop reading; the next `next_frame` returns `None`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next frame, already applied to the transcript.
    ///
    /// Returns `None` at end of stream or once cancelled, even while a read
    /// is pending.
    pub async fn next_frame(&mut self) -> Option<Result<ParsedFrame, ParleyError>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            next = self.frames.next() => next,
        };
        if let Some(Ok(frame)) = &next {
            self.transcript.on_frame(frame);
        }
        next
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Drain the stream and return the transcript.
    pub async fn collect(mut self) -> Result<Transcript, ParleyError> {
        while let Some(frame) = self.next_frame().await {
            frame?;
        }
        Ok(self.transcript)
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("transcript", &self.transcript)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}
