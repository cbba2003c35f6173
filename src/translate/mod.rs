//! Translation of native engine events into canonical frames.

use std::time::Duration;

use serde_json::Value;

use crate::engine::EngineEvent;
use crate::error::ParleyError;
use crate::protocol::Frame;

/// Characters per synthesized token frame.
pub const DEFAULT_SYNTH_CHUNK_CHARS: usize = 24;

/// Delay between synthesized token frames.
pub const DEFAULT_SYNTH_DELAY: Duration = Duration::from_millis(10);

/// Frames produced by one engine event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    pub frames: Vec<Frame>,
    /// Delay to observe after each frame when the output was synthesized.
    pub pacing: Option<Duration>,
}

impl Translation {
    fn frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            pacing: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Text carried by the token frames, in order.
    pub fn token_text(&self) -> String {
        self.frames.iter().filter_map(Frame::token_text).collect()
    }
}

/// Stateful translator for one session.
#[derive(Debug, Clone)]
pub struct EventTranslator {
    chunk_chars: usize,
    pacing: Duration,
    saw_tokens: bool,
}

impl Default for EventTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_SYNTH_CHUNK_CHARS, DEFAULT_SYNTH_DELAY)
    }
}

impl EventTranslator {
    pub fn new(chunk_chars: usize, pacing: Duration) -> Self {
        Self {
            chunk_chars: chunk_chars.max(1),
            pacing,
            saw_tokens: false,
        }
    }

    /// Whether any real token frame has been produced.
    pub fn saw_tokens(&self) -> bool {
        self.saw_tokens
    }

    /// Translate one event.
    ///
    /// `buffer_is_empty` reports whether the session buffer holds any text;
    /// final-answer synthesis only runs when it does not.
    pub fn translate(
        &mut self,
        event: EngineEvent,
        buffer_is_empty: bool,
    ) -> Result<Translation, ParleyError> {
        match event {
            EngineEvent::LlmStream { chunk } => Ok(self.tokens(chunk)),
            EngineEvent::ChatModelStream { content } => Ok(self.tokens(content.text())),
            EngineEvent::ToolStart { name, input } => {
                let name = require_tool_name(name)?;
                Ok(Translation::frames(vec![Frame::tool_start(name, input)]))
            }
            EngineEvent::ToolEnd { name, output } => {
                let name = require_tool_name(name)?;
                Ok(Translation::frames(vec![Frame::tool_output(name, output)]))
            }
            EngineEvent::ChainEnd { output } => {
                if self.saw_tokens || !buffer_is_empty {
                    return Ok(Translation::default());
                }
                let Some(text) = final_answer_text(&output)? else {
                    return Ok(Translation::default());
                };
                let frames = split_chunks(&text, self.chunk_chars)
                    .into_iter()
                    .map(Frame::token)
                    .collect();
                Ok(Translation {
                    frames,
                    pacing: Some(self.pacing),
                })
            }
            EngineEvent::Unrecognized { kind } => Err(ParleyError::Translation(format!(
                "unrecognized engine event '{kind}'"
            ))),
        }
    }

    fn tokens(&mut self, text: String) -> Translation {
        if text.is_empty() {
            return Translation::default();
        }
        self.saw_tokens = true;
        Translation::frames(vec![Frame::token(text)])
    }
}

fn require_tool_name(name: String) -> Result<String, ParleyError> {
    if name.trim().is_empty() {
        return Err(ParleyError::Translation("tool event without a name".into()));
    }
    Ok(name)
}

/// Extract the final answer from a chain output value.
///
/// Accepts a bare string, or an object with an `output` or `content` field.
pub fn final_answer_text(output: &Value) -> Result<Option<String>, ParleyError> {
    let text = match output {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map
            .get("output")
            .and_then(scalar_text)
            .or_else(|| map.get("content").and_then(scalar_text)),
        other => {
            return Err(ParleyError::Translation(format!(
                "unusable chain output: {other}"
            )))
        }
    };
    Ok(text.filter(|t| !t.is_empty()))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Split text into chunks of at most `size` characters.
pub fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}
