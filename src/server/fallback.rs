//! Tool-less secondary execution after the agent fails.

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::engine::{ChunkContent, EngineEvent, EngineEventStream, TextDeltaStream};
use crate::types::{Message, ModelMessage, StreamEventType};

/// Warning sent when the primary execution fails.
pub const FALLBACK_WARNING: &str = "Agent stream failed, trying direct fallback";

/// Error message used when the fallback failure carries none.
pub const FALLBACK_DEFAULT_ERROR: &str = "Connection error (fallback)";

/// Which messages the fallback model sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Only the current user message.
    #[default]
    CurrentMessageOnly,
    /// The stored history, ending with the current message.
    ReplayHistory,
}

impl FallbackPolicy {
    pub fn messages(self, history: &[Message], input: &str) -> Vec<ModelMessage> {
        match self {
            Self::CurrentMessageOnly => vec![ModelMessage::user(input)],
            Self::ReplayHistory => {
                let mut messages: Vec<ModelMessage> =
                    history.iter().map(Message::to_model_message).collect();
                let ends_with_input = history.last().is_some_and(|m| m.content == input);
                if !ends_with_input {
                    messages.push(ModelMessage::user(input));
                }
                messages
            }
        }
    }
}

/// Present fallback text deltas as chat-model events so they pass through
/// the same translator as the primary stream.
pub fn fallback_events(deltas: TextDeltaStream) -> EngineEventStream {
    deltas
        .filter_map(|delta| async move {
            match delta {
                Ok(delta) if delta.event_type == StreamEventType::TextDelta => {
                    Some(Ok(EngineEvent::ChatModelStream {
                        content: ChunkContent::Text(delta.text),
                    }))
                }
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            }
        })
        .boxed()
}

/// Message for the fallback `error` frame.
pub fn fallback_error_message(err: &crate::error::ParleyError) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        FALLBACK_DEFAULT_ERROR.to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParleyError;
    use crate::types::{Role, TextStreamDelta};
    use chrono::Utc;
    use futures::stream;

    fn message(role: Role, content: &str) -> Message {
        Message {
            id: content.into(),
            thread_id: "t".into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            meta: None,
        }
    }

    #[test]
    fn current_message_only_is_the_default() {
        let history = vec![message(Role::User, "a"), message(Role::Assistant, "b")];
        let messages = FallbackPolicy::default().messages(&history, "c");
        assert_eq!(messages, vec![ModelMessage::user("c")]);
    }

    #[test]
    fn replay_history_does_not_repeat_the_input() {
        let history = vec![
            message(Role::User, "a"),
            message(Role::Assistant, "b"),
            message(Role::User, "c"),
        ];
        let messages = FallbackPolicy::ReplayHistory.messages(&history, "c");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn deltas_become_chat_model_events() {
        let deltas: TextDeltaStream = Box::pin(stream::iter(vec![
            Ok(TextStreamDelta::text("Hel")),
            Ok(TextStreamDelta::done(None)),
            Err(ParleyError::Stream("cut".into())),
        ]));
        let events: Vec<_> = fallback_events(deltas).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &EngineEvent::ChatModelStream {
                content: ChunkContent::Text("Hel".into())
            }
        );
        assert!(events[1].is_err());
    }
}
