//! Incremental frame parser and dispatch.
//!
//! Bytes may arrive split at any position, including inside a multi-byte
//! UTF-8 sequence or inside the frame delimiter. The parser keeps one text
//! buffer, slices out every complete block ending in a blank line, and leaves
//! the rest for the next chunk.

use std::str::FromStr;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;

use super::frame::{FrameEvent, DELIMITER};
use crate::error::ParleyError;

/// A decoded `(event, data)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    /// Event name as sent; `message` when the block had no `event:` line.
    pub event: String,
    /// Raw payload with only the `data:` prefix removed.
    pub data: String,
}

impl ParsedFrame {
    /// The canonical event, when the name is part of the vocabulary.
    pub fn kind(&self) -> Option<FrameEvent> {
        FrameEvent::from_str(&self.event).ok()
    }

    /// Parse the payload as JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.data).ok()
    }

    /// Thread id carried by a `done` or `thread` payload.
    pub fn thread_id(&self) -> Option<String> {
        self.json()?
            .get("threadId")?
            .as_str()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

/// Stateful parser for one connection.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: String,
    /// Tail of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    /// Offset before which the buffer holds no delimiter.
    scan_from: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ParsedFrame> {
        self.decode(chunk);
        self.drain_frames()
    }

    /// Text buffered but not yet terminated by a delimiter.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    /// True when nothing is buffered.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.pending.is_empty()
    }

    /// End of input: drop any unterminated block and return its size in bytes.
    pub fn finish(&mut self) -> usize {
        let leftover = self.buffer.len() + self.pending.len();
        self.buffer.clear();
        self.pending.clear();
        self.scan_from = 0;
        leftover
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // incomplete sequence at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn drain_frames(&mut self) -> Vec<ParsedFrame> {
        let mut frames = Vec::new();
        loop {
            let Some(offset) = self.buffer[self.scan_from..].find(DELIMITER) else {
                // a delimiter may straddle the next chunk
                self.scan_from = self.buffer.len().saturating_sub(1);
                while !self.buffer.is_char_boundary(self.scan_from) {
                    self.scan_from -= 1;
                }
                return frames;
            };
            let end = self.scan_from + offset;
            let block: String = self.buffer.drain(..end + DELIMITER.len()).collect();
            self.scan_from = 0;
            if let Some(frame) = parse_block(&block[..end]) {
                frames.push(frame);
            }
        }
    }
}

/// Parse one delimiter-free block into a frame.
///
/// Comment lines and unknown fields are skipped; a block with neither an
/// `event:` nor a `data:` line yields nothing.
pub fn parse_block(block: &str) -> Option<ParsedFrame> {
    let mut event: Option<String> = None;
    let mut data: Option<String> = None;

    for line in block.split('\n') {
        if line.starts_with(':') {
            continue;
        }
        if let Some(name) = line.strip_prefix("event:") {
            event = Some(name.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }

    if event.is_none() && data.is_none() {
        return None;
    }
    Some(ParsedFrame {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.unwrap_or_default(),
    })
}

/// Receives dispatched frames.
pub trait FrameHandler {
    fn on_frame(&mut self, frame: &ParsedFrame);
}

impl<F> FrameHandler for F
where
    F: FnMut(&ParsedFrame),
{
    fn on_frame(&mut self, frame: &ParsedFrame) {
        self(frame)
    }
}

/// Standard handler: accumulates tokens and captures the thread id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    text: String,
    thread_id: Option<String>,
    diagnostics: Vec<ParsedFrame>,
    finished: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated assistant text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Thread id captured from `done` or `thread`.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Tool, warning and error frames in arrival order.
    pub fn diagnostics(&self) -> &[ParsedFrame] {
        &self.diagnostics
    }

    /// Whether a `done` frame arrived.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// First `error` frame message, if any.
    pub fn error_message(&self) -> Option<String> {
        self.diagnostics
            .iter()
            .find(|frame| frame.kind() == Some(FrameEvent::Error))
            .and_then(|frame| frame.json())
            .and_then(|value| value.get("message")?.as_str().map(str::to_string))
    }
}

impl FrameHandler for Transcript {
    fn on_frame(&mut self, frame: &ParsedFrame) {
        match frame.kind() {
            Some(FrameEvent::Token) => self.text.push_str(&frame.data),
            Some(FrameEvent::Done) => {
                self.finished = true;
                if let Some(id) = frame.thread_id() {
                    self.thread_id = Some(id);
                }
            }
            Some(FrameEvent::Thread) => {
                if let Some(id) = frame.thread_id() {
                    self.thread_id = Some(id);
                }
            }
            Some(_) => self.diagnostics.push(frame.clone()),
            None => {}
        }
    }
}

/// Adapt a byte stream into a stream of parsed frames.
pub fn frame_stream<S, E>(bytes: S) -> impl Stream<Item = Result<ParsedFrame, ParleyError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<ParleyError>,
{
    async_stream::stream! {
        let mut parser = FrameParser::new();
        futures::pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in parser.push(&chunk) {
                        yield Ok(frame);
                    }
                }
                Err(err) => {
                    yield Err(err.into());
                    break;
                }
            }
        }
        let leftover = parser.finish();
        if leftover > 0 {
            tracing::debug!(leftover, "stream ended inside an unterminated frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(event: &str, data: &str) -> ParsedFrame {
        ParsedFrame {
            event: event.into(),
            data: data.into(),
        }
    }

    #[test]
    fn data_prefix_strips_one_space_only() {
        assert_eq!(parse_block("event: token\ndata:   x "), Some(frame("token", "  x ")));
        assert_eq!(parse_block("event:token\ndata:x"), Some(frame("token", "x")));
    }

    #[test]
    fn multiple_data_lines_join_with_newline() {
        assert_eq!(
            parse_block("event: token\ndata: a\ndata: \ndata: b"),
            Some(frame("token", "a\n\nb"))
        );
    }

    #[test]
    fn comment_only_block_yields_nothing() {
        assert_eq!(parse_block(": ping"), None);
        assert_eq!(parse_block(""), None);
    }

    #[test]
    fn frame_split_inside_delimiter_is_reassembled() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"event: token\ndata: hi\n").is_empty());
        assert_eq!(parser.push(b"\nevent: done"), vec![frame("token", "hi")]);
        assert_eq!(parser.remainder(), "event: done");
        assert_eq!(parser.finish(), "event: done".len());
        assert!(parser.is_idle());
    }

    #[test]
    fn split_multibyte_sequence_is_not_decoded_early() {
        let encoded = "event: token\ndata: é\n\n".as_bytes();
        let split = encoded.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut parser = FrameParser::new();
        assert!(parser.push(&encoded[..split]).is_empty());
        assert_eq!(parser.push(&encoded[split..]), vec![frame("token", "é")]);
        assert!(parser.is_idle());
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut parser = FrameParser::new();
        let frames = parser.push(b"event: token\ndata: a\xFFb\n\n");
        assert_eq!(frames, vec![frame("token", "a\u{FFFD}b")]);
    }

    #[test]
    fn transcript_tolerates_unparseable_done() {
        let mut transcript = Transcript::new();
        transcript.on_frame(&frame("token", " Hi"));
        transcript.on_frame(&frame("done", "not json"));
        assert_eq!(transcript.text(), " Hi");
        assert_eq!(transcript.thread_id(), None);
        assert!(transcript.is_finished());
    }

    #[test]
    fn transcript_captures_thread_from_thread_event() {
        let mut transcript = Transcript::new();
        transcript.on_frame(&frame("thread", r#"{"threadId":"t-9"}"#));
        transcript.on_frame(&frame("warn", r#"{"message":"careful"}"#));
        transcript.on_frame(&frame("error", r#"{"message":"boom"}"#));
        assert_eq!(transcript.thread_id(), Some("t-9"));
        assert_eq!(transcript.diagnostics().len(), 2);
        assert_eq!(transcript.error_message().as_deref(), Some("boom"));
        assert!(!transcript.is_finished());
    }

    #[test]
    fn closures_are_handlers() {
        let mut seen = Vec::new();
        let mut handler = |frame: &ParsedFrame| seen.push(frame.event.clone());
        handler.on_frame(&frame("token", "x"));
        assert_eq!(seen, vec!["token".to_string()]);
    }
}
