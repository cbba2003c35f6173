//! Frame encoding for the event-stream wire protocol.
//!
//! A frame is an `event:` line, one or more `data:` lines and a blank line.
//! Token payloads are written verbatim; every other event carries a single
//! line of JSON. Keep-alives are SSE comment lines and never form a frame.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{AsRefStr, Display, EnumString};

/// Comment line written as a keep-alive.
pub const PING: &str = ": ping\n\n";

/// Frame delimiter.
pub const DELIMITER: &str = "\n\n";

/// Canonical event names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FrameEvent {
    /// Incremental assistant text, whitespace-significant.
    Token,
    /// A tool invocation started.
    ToolStart,
    /// A tool invocation produced output.
    ToolOutput,
    /// Non-fatal diagnostic.
    Warn,
    /// Fatal diagnostic for the current execution path.
    Error,
    /// Terminal frame carrying the resolved thread id.
    Done,
    /// Thread announcement, same payload as `done`.
    Thread,
}

/// Payload of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// Raw text, written byte-for-byte.
    Text(String),
    /// Structured value, written as compact JSON.
    Json(Value),
}

/// One unit of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: FrameEvent,
    pub data: FramePayload,
}

impl Frame {
    pub fn token(text: impl Into<String>) -> Self {
        Self {
            event: FrameEvent::Token,
            data: FramePayload::Text(text.into()),
        }
    }

    pub fn tool_start(tool: impl Into<String>, input: Value) -> Self {
        Self::json(FrameEvent::ToolStart, json!({ "tool": tool.into(), "input": input }))
    }

    pub fn tool_output(tool: impl Into<String>, output: Value) -> Self {
        Self::json(FrameEvent::ToolOutput, json!({ "tool": tool.into(), "output": output }))
    }

    pub fn warn(message: impl Into<String>, detail: Option<String>) -> Self {
        let mut payload = json!({ "message": message.into() });
        if let Some(detail) = detail {
            payload["detail"] = Value::String(detail);
        }
        Self::json(FrameEvent::Warn, payload)
    }

    pub fn error(message: impl Into<String>, thread_id: Option<&str>) -> Self {
        let mut payload = json!({ "message": message.into() });
        if let Some(thread_id) = thread_id {
            payload["threadId"] = Value::String(thread_id.to_string());
        }
        Self::json(FrameEvent::Error, payload)
    }

    pub fn done(thread_id: &str) -> Self {
        Self::json(FrameEvent::Done, json!({ "threadId": thread_id }))
    }

    pub fn thread(thread_id: &str) -> Self {
        Self::json(FrameEvent::Thread, json!({ "threadId": thread_id }))
    }

    fn json(event: FrameEvent, payload: Value) -> Self {
        Self {
            event,
            data: FramePayload::Json(payload),
        }
    }

    /// Text carried by a `token` frame.
    pub fn token_text(&self) -> Option<&str> {
        match (&self.event, &self.data) {
            (FrameEvent::Token, FramePayload::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Serialize the frame into one contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut out = String::with_capacity(32);
        out.push_str("event: ");
        out.push_str(self.event.as_ref());
        out.push('\n');
        match &self.data {
            FramePayload::Text(text) => {
                // one data line per line of text; the parser re-joins with '\n'
                for line in text.split('\n') {
                    push_data_line(&mut out, line);
                }
            }
            FramePayload::Json(value) => {
                // serde_json escapes control characters, so this is one line
                push_data_line(&mut out, &value.to_string());
            }
        }
        out.push('\n');
        Bytes::from(out)
    }
}

fn push_data_line(out: &mut String, line: &str) {
    out.push_str("data: ");
    out.push_str(line);
    out.push('\n');
}

/// Serialize a keep-alive comment.
pub fn encode_ping() -> Bytes {
    Bytes::from_static(PING.as_bytes())
}
