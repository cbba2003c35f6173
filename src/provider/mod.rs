//! Model provider trait and implementations.

pub mod http;

#[cfg(feature = "openai")]
pub mod openai;

use async_trait::async_trait;

use crate::engine::TextDeltaStream;
use crate::error::ParleyError;
use crate::types::{GenerationSettings, ModelMessage};

/// A request sent to a model provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<ModelMessage>,
    pub settings: GenerationSettings,
    pub tools: Option<Vec<ToolDefinition>>,
}

impl ProviderRequest {
    /// A request without tools.
    pub fn new(messages: Vec<ModelMessage>, settings: GenerationSettings) -> Self {
        Self {
            messages,
            settings,
            tools: None,
        }
    }
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Core trait implemented by model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Generate text as a stream of deltas.
    ///
    /// Tool calls arrive fully assembled as `ToolCall` deltas before the
    /// terminal `Done` delta.
    async fn stream_text(&self, request: &ProviderRequest) -> Result<TextDeltaStream, ParleyError>;
}
