//! OpenAI Chat Completions API provider.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::engine::TextDeltaStream;
use crate::error::ParleyError;
use crate::types::*;

use super::http::{bearer_headers, parse_sse_data, shared_client, status_to_error};
use super::{ModelProvider, ProviderRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn build_request_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_openai)
            .collect::<Vec<_>>();

        let mut obj = serde_json::Map::new();
        obj.insert("model".into(), self.model.clone().into());
        obj.insert("messages".into(), messages.into());
        obj.insert("stream".into(), true.into());

        if let Some(max) = request.settings.max_tokens {
            obj.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = request.settings.temperature {
            obj.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = request.settings.top_p {
            obj.insert("top_p".into(), top_p.into());
        }
        if let Some(ref user) = request.settings.user {
            obj.insert("user".into(), user.clone().into());
        }

        if let Some(ref tools) = request.tools {
            if !tools.is_empty() {
                let tool_defs: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect();
                obj.insert("tools".into(), tool_defs.into());
            }
        }

        serde_json::Value::Object(obj)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream_text(&self, request: &ProviderRequest) -> Result<TextDeltaStream, ParleyError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, messages = request.messages.len(), "OpenAI stream_text");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut calls: BTreeMap<u32, PartialToolCall> = BTreeMap::new();
            let mut finished = false;
            futures::pin_mut!(byte_stream);

            'read: while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ParleyError::Network(e));
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);

                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = parse_sse_data(line) else {
                        continue;
                    };
                    let chunk = match serde_json::from_str::<OpenAiStreamChunk>(data) {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            debug!(error = %err, "skipping unparseable OpenAI chunk");
                            continue;
                        }
                    };
                    if let Some(error) = chunk.error {
                        yield Err(ParleyError::api(200, error.message));
                        return;
                    }
                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                        yield Ok(TextStreamDelta::text(text));
                    }
                    for delta in choice.delta.tool_calls.unwrap_or_default() {
                        calls.entry(delta.index).or_default().merge(delta);
                    }
                    if let Some(reason) = choice.finish_reason.as_deref() {
                        for call in std::mem::take(&mut calls).into_values() {
                            yield Ok(TextStreamDelta::tool_call(call.finish()));
                        }
                        yield Ok(TextStreamDelta::done(parse_finish_reason(reason)));
                        finished = true;
                        break 'read;
                    }
                }
            }

            if !finished {
                for call in calls.into_values() {
                    yield Ok(TextStreamDelta::tool_call(call.finish()));
                }
                yield Ok(TextStreamDelta::done(None));
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Tool call assembled from streamed fragments.
#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn merge(&mut self, delta: OpenAiToolCallDelta) {
        if let Some(id) = delta.id {
            self.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                self.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                self.arguments.push_str(&arguments);
            }
        }
    }

    fn finish(self) -> AgentToolCall {
        let arguments = if self.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&self.arguments)
                .unwrap_or(serde_json::Value::String(self.arguments))
        };
        AgentToolCall {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

fn parse_finish_reason(s: &str) -> Option<FinishReason> {
    match s {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

fn message_to_openai(msg: &ModelMessage) -> serde_json::Value {
    let role = msg.role.to_string();

    if let [ContentPart::ToolResult(tr)] = msg.content.as_slice() {
        let content = match &tr.result {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": tr.tool_call_id,
            "content": content,
        });
    }

    let tool_calls = msg.tool_calls();
    if !tool_calls.is_empty() {
        let tc_json: Vec<serde_json::Value> = tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        let text = msg.text_content();
        return serde_json::json!({
            "role": role,
            "content": if text.is_empty() { serde_json::Value::Null } else { serde_json::Value::String(text) },
            "tool_calls": tc_json,
        });
    }

    serde_json::json!({ "role": role, "content": msg.text_content() })
}

// OpenAI API response types (internal)

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    error: Option<OpenAiStreamError>,
}

#[derive(Deserialize)]
struct OpenAiStreamError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Deserialize)]
struct OpenAiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_body_includes_settings_and_tools() {
        let provider = OpenAiProvider::new("gpt-4o-mini", "sk-test", Some("http://x/v1/".into()));
        assert_eq!(provider.base_url, "http://x/v1");
        let request = ProviderRequest {
            messages: vec![ModelMessage::user("hi")],
            settings: GenerationSettings::builder().temperature(0.2).build(),
            tools: Some(vec![super::super::ToolDefinition {
                name: "current_time".into(),
                description: "now".into(),
                parameters: json!({ "type": "object", "properties": {} }),
            }]),
        };
        let body = provider.build_request_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0], json!({ "role": "user", "content": "hi" }));
        assert_eq!(body["tools"][0]["function"]["name"], "current_time");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn tool_messages_use_openai_shapes() {
        let assistant = ModelMessage {
            role: Role::Assistant,
            content: vec![ContentPart::ToolCall(AgentToolCall {
                id: "call_1".into(),
                name: "calculator".into(),
                arguments: json!({ "expression": "2+2" }),
            })],
        };
        let value = message_to_openai(&assistant);
        assert_eq!(value["content"], serde_json::Value::Null);
        assert_eq!(value["tool_calls"][0]["function"]["arguments"], "{\"expression\":\"2+2\"}");

        let result = message_to_openai(&ModelMessage::tool_result("call_1", json!("4"), false));
        assert_eq!(result, json!({ "role": "tool", "tool_call_id": "call_1", "content": "4" }));
    }

    #[test]
    fn partial_tool_calls_assemble() {
        let mut call = PartialToolCall::default();
        call.merge(OpenAiToolCallDelta {
            index: 0,
            id: Some("c".into()),
            function: Some(OpenAiFunctionDelta {
                name: Some("calculator".into()),
                arguments: Some("{\"expr".into()),
            }),
        });
        call.merge(OpenAiToolCallDelta {
            index: 0,
            id: None,
            function: Some(OpenAiFunctionDelta {
                name: None,
                arguments: Some("ession\":\"1\"}".into()),
            }),
        });
        let call = call.finish();
        assert_eq!(call.name, "calculator");
        assert_eq!(call.arguments, json!({ "expression": "1" }));
    }
}
