//! Reference tool-calling agent over a streaming model provider.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    AgentAnswer, AgentEngine, AgentStep, ChunkContent, EngineEvent, EngineEventStream,
    TextDeltaStream, TextModel,
};
use crate::error::ParleyError;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::tools::{Tool, ToolArguments, ToolExecutionContext};
use crate::types::{
    AgentToolCall, ContentPart, GenerationSettings, Message, ModelMessage, Role, StreamEventType,
};

/// Upper bound on model calls per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 8;

/// Agent that alternates model calls and tool executions until the model
/// answers without requesting a tool.
#[derive(Clone)]
pub struct ToolAgent {
    provider: Arc<dyn ModelProvider>,
    tools: Vec<Arc<dyn Tool>>,
    settings: GenerationSettings,
    max_iterations: usize,
}

impl ToolAgent {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            provider,
            tools,
            settings: GenerationSettings::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// System prompt listing the available tools.
    pub fn system_prompt(&self) -> String {
        let descriptions = self
            .tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n");
        [
            "You are a helpful assistant. You may use tools when needed.",
            "Available tools:",
            descriptions.as_str(),
            "When you use tools, briefly explain the result.",
        ]
        .join("\n")
    }

    /// Model messages for one turn: system prompt, history, then the input.
    ///
    /// The input is not repeated when it is already the last history entry.
    pub fn initial_messages(&self, history: &[Message], input: &str) -> Vec<ModelMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ModelMessage::system(self.system_prompt()));
        messages.extend(history.iter().map(Message::to_model_message));
        let already_present = history
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == input);
        if !already_present {
            messages.push(ModelMessage::user(input));
        }
        messages
    }

    fn find_tool(tools: &[Arc<dyn Tool>], name: &str) -> Option<Arc<dyn Tool>> {
        tools.iter().find(|t| t.name() == name).cloned()
    }

    async fn execute_tool(tools: &[Arc<dyn Tool>], call: &AgentToolCall) -> (Value, bool) {
        let Some(tool) = Self::find_tool(tools, &call.name) else {
            return (json!({ "error": format!("unknown tool '{}'", call.name) }), true);
        };
        let ctx = ToolExecutionContext {
            call_id: call.id.clone(),
            thread_id: None,
        };
        match tool.execute(&ToolArguments::new(call.arguments.clone()), &ctx).await {
            Ok(output) => (output, false),
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool execution failed");
                (json!({ "error": err.to_string() }), true)
            }
        }
    }
}

impl std::fmt::Debug for ToolAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolAgent")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .field("tools", &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

#[async_trait]
impl AgentEngine for ToolAgent {
    async fn run(&self, history: &[Message], input: &str) -> Result<AgentAnswer, ParleyError> {
        let mut events = self.stream_events(history, input).await?;
        let mut output = String::new();
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut pending: Vec<(String, Value)> = Vec::new();

        while let Some(event) = events.next().await {
            match event? {
                EngineEvent::ToolStart { name, input } => pending.push((name, input)),
                EngineEvent::ToolEnd { name, output: result } => {
                    let position = pending.iter().position(|(n, _)| *n == name);
                    let input = position
                        .map(|i| pending.remove(i).1)
                        .unwrap_or(Value::Null);
                    steps.push(AgentStep {
                        tool: name,
                        input,
                        output: result,
                    });
                }
                EngineEvent::ChainEnd { output: value } => {
                    if let Some(text) = value.get("output").and_then(Value::as_str) {
                        output = text.to_string();
                    }
                }
                _ => {}
            }
        }

        Ok(AgentAnswer { output, steps })
    }

    async fn stream_events(
        &self,
        history: &[Message],
        input: &str,
    ) -> Result<EngineEventStream, ParleyError> {
        let provider = Arc::clone(&self.provider);
        let tools = self.tools.clone();
        let definitions: Vec<_> = tools.iter().map(|t| t.definition()).collect();
        let settings = self.settings.clone();
        let max_iterations = self.max_iterations;
        let mut messages = self.initial_messages(history, input);

        let stream = async_stream::stream! {
            for iteration in 0..max_iterations {
                let request = ProviderRequest {
                    messages: messages.clone(),
                    settings: settings.clone(),
                    tools: (!definitions.is_empty()).then(|| definitions.clone()),
                };
                debug!(iteration, messages = request.messages.len(), "agent model call");
                let mut deltas = match provider.stream_text(&request).await {
                    Ok(deltas) => deltas,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                let mut text = String::new();
                let mut calls: Vec<AgentToolCall> = Vec::new();
                while let Some(delta) = deltas.next().await {
                    let delta = match delta {
                        Ok(delta) => delta,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };
                    match delta.event_type {
                        StreamEventType::TextDelta if !delta.text.is_empty() => {
                            text.push_str(&delta.text);
                            yield Ok(EngineEvent::ChatModelStream {
                                content: ChunkContent::Text(delta.text),
                            });
                        }
                        StreamEventType::ToolCall => calls.extend(delta.tool_call),
                        StreamEventType::Done => break,
                        _ => {}
                    }
                }

                if calls.is_empty() {
                    yield Ok(EngineEvent::ChainEnd {
                        output: json!({ "output": text }),
                    });
                    return;
                }

                let mut content = Vec::with_capacity(calls.len() + 1);
                if !text.is_empty() {
                    content.push(ContentPart::Text { text });
                }
                content.extend(calls.iter().cloned().map(ContentPart::ToolCall));
                messages.push(ModelMessage {
                    role: Role::Assistant,
                    content,
                });

                for call in calls {
                    yield Ok(EngineEvent::ToolStart {
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                    let (output, is_error) = ToolAgent::execute_tool(&tools, &call).await;
                    yield Ok(EngineEvent::ToolEnd {
                        name: call.name.clone(),
                        output: output.clone(),
                    });
                    messages.push(ModelMessage::tool_result(call.id, output, is_error));
                }
            }

            yield Err(ParleyError::Stream(format!(
                "tool loop exceeded {max_iterations} iterations"
            )));
        };

        Ok(Box::pin(stream))
    }
}

/// Tool-less text generation through a provider.
#[derive(Clone)]
pub struct ProviderTextModel {
    provider: Arc<dyn ModelProvider>,
    settings: GenerationSettings,
}

impl ProviderTextModel {
    pub fn new(provider: Arc<dyn ModelProvider>, settings: GenerationSettings) -> Self {
        Self { provider, settings }
    }
}

#[async_trait]
impl TextModel for ProviderTextModel {
    async fn stream_text(&self, messages: Vec<ModelMessage>) -> Result<TextDeltaStream, ParleyError> {
        let request = ProviderRequest::new(messages, self.settings.clone());
        self.provider.stream_text(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::calculator_tool;
    use crate::types::TextStreamDelta;
    use chrono::Utc;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Provider that replays one scripted response per call.
    struct ScriptedProvider {
        turns: Mutex<Vec<Vec<TextStreamDelta>>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(mut turns: Vec<Vec<TextStreamDelta>>) -> Self {
            turns.reverse();
            Self {
                turns: Mutex::new(turns),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_id(&self) -> &str {
            "scripted-1"
        }

        async fn stream_text(&self, request: &ProviderRequest) -> Result<TextDeltaStream, ParleyError> {
            self.requests.lock().unwrap().push(request.clone());
            let turn = self
                .turns
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ParleyError::Stream("script exhausted".into()))?;
            Ok(Box::pin(stream::iter(turn.into_iter().map(Ok))))
        }
    }

    fn calc_call(expression: &str) -> TextStreamDelta {
        TextStreamDelta::tool_call(AgentToolCall {
            id: "call_1".into(),
            name: "calculator".into(),
            arguments: json!({ "expression": expression }),
        })
    }

    fn user_message(content: &str) -> Message {
        Message {
            id: "m1".into(),
            thread_id: "t1".into(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            meta: None,
        }
    }

    #[tokio::test]
    async fn tool_call_round_trip_emits_events_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![calc_call("6*7"), TextStreamDelta::done(None)],
            vec![
                TextStreamDelta::text("It is "),
                TextStreamDelta::text("42."),
                TextStreamDelta::done(None),
            ],
        ]));
        let agent = ToolAgent::new(provider.clone(), vec![calculator_tool()]);
        let events: Vec<_> = agent
            .stream_events(&[], "what is 6*7?")
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                EngineEvent::ToolStart {
                    name: "calculator".into(),
                    input: json!({ "expression": "6*7" }),
                },
                EngineEvent::ToolEnd {
                    name: "calculator".into(),
                    output: json!("42"),
                },
                EngineEvent::ChatModelStream {
                    content: ChunkContent::Text("It is ".into()),
                },
                EngineEvent::ChatModelStream {
                    content: ChunkContent::Text("42.".into()),
                },
                EngineEvent::ChainEnd {
                    output: json!({ "output": "It is 42." }),
                },
            ]
        );

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        assert_eq!(second.last().unwrap().role, Role::Tool);
        assert_eq!(second[second.len() - 2].tool_calls().len(), 1);
    }

    #[tokio::test]
    async fn run_collects_steps_and_output() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![calc_call("1/0")],
            vec![TextStreamDelta::text("Cannot divide by zero.")],
        ]));
        let agent = ToolAgent::new(provider, vec![calculator_tool()]);
        let answer = agent.run(&[], "1/0?").await.unwrap();
        assert_eq!(answer.output, "Cannot divide by zero.");
        assert_eq!(answer.steps.len(), 1);
        assert_eq!(answer.steps[0].input, json!({ "expression": "1/0" }));
        assert!(answer.steps[0].output["error"]
            .as_str()
            .unwrap()
            .contains("division by zero"));
    }

    #[tokio::test]
    async fn loop_is_bounded() {
        let turns = (0..3).map(|_| vec![calc_call("1+1")]).collect();
        let agent = ToolAgent::new(Arc::new(ScriptedProvider::new(turns)), vec![calculator_tool()])
            .with_max_iterations(2);
        let result = agent.run(&[], "loop").await;
        assert!(matches!(result, Err(ParleyError::Stream(_))));
    }

    #[test]
    fn input_is_not_duplicated_when_already_in_history() {
        let agent = ToolAgent::new(Arc::new(ScriptedProvider::new(vec![])), vec![calculator_tool()]);
        let history = vec![user_message("hello")];
        let messages = agent.initial_messages(&history, "hello");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].text_content().contains("- calculator:"));

        let messages = agent.initial_messages(&history, "again");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].text_content(), "again");
    }
}
