//! Streaming chat server: orchestration, fallback, keepalive and HTTP routes.

pub mod fallback;
pub mod http;
pub mod keepalive;
pub mod orchestrator;
pub mod session;
pub mod writer;

pub use fallback::FallbackPolicy;
pub use http::{router, serve, AppState};
pub use orchestrator::{
    ChatReply, ChatRequest, OrchestratorSettings, PreparedTurn, SessionHandle, StreamOrchestrator,
};
pub use session::{SessionOutcome, SessionPhase, TerminalKind};

#[cfg(feature = "openai")]
use std::sync::Arc;

#[cfg(feature = "openai")]
use crate::config::ParleyConfig;
#[cfg(feature = "openai")]
use crate::engine::agent::{ProviderTextModel, ToolAgent};
#[cfg(feature = "openai")]
use crate::provider::openai::OpenAiProvider;
#[cfg(feature = "openai")]
use crate::store::{FileStore, MemoryStore, ThreadStore};

/// Wire the OpenAI-backed agent, fallback model and store from config.
///
/// Missing credentials do not fail here; sessions report them as an
/// error frame instead.
#[cfg(feature = "openai")]
pub fn app_state_from_config(config: &ParleyConfig) -> AppState {
    let provider = Arc::new(OpenAiProvider::new(
        config.model.clone(),
        config.api_key().unwrap_or_default(),
        config.base_url().map(str::to_string),
    ));
    let settings = config.generation_settings();
    let engine = ToolAgent::new(provider.clone(), crate::tools::all_tools())
        .with_settings(settings.clone());
    let fallback = ProviderTextModel::new(provider, settings);

    let store: Arc<dyn ThreadStore> = match &config.data_dir {
        Some(dir) => {
            tracing::info!(path = %dir.display(), "using file thread store");
            Arc::new(FileStore::new(dir.clone()))
        }
        None => Arc::new(MemoryStore::new()),
    };

    AppState::new(StreamOrchestrator::new(
        store,
        Arc::new(engine),
        Arc::new(fallback),
        Arc::new(config.clone()),
        config.orchestrator_settings(),
    ))
}
