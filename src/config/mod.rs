//! Configuration system (layered: code > env > TOML file).

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::CredentialCheck;
use crate::error::ParleyError;
use crate::server::{FallbackPolicy, OrchestratorSettings};
use crate::types::GenerationSettings;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// Contents of `parley.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub bind: Option<String>,
    pub keepalive_secs: Option<u64>,
    pub data_dir: Option<PathBuf>,
    pub fallback_replay_history: Option<bool>,
}

/// Resolved runtime configuration.
#[derive(Clone)]
pub struct ParleyConfig {
    api_key: Option<String>,
    base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub bind: SocketAddr,
    pub keepalive_interval: Duration,
    /// File store location; the in-memory store is used when unset.
    pub data_dir: Option<PathBuf>,
    pub fallback_policy: FallbackPolicy,
}

impl fmt::Debug for ParleyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParleyConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("bind", &self.bind)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("data_dir", &self.data_dir)
            .field("fallback_policy", &self.fallback_policy)
            .finish()
    }
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ParleyConfig {
    /// Built-in defaults, no credentials.
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            data_dir: None,
            fallback_policy: FallbackPolicy::CurrentMessageOnly,
        }
    }

    /// Load from `.env`, the process environment and the config file.
    ///
    /// The file is `PARLEY_CONFIG` when set, else `parley.toml` in the
    /// platform config directory when it exists.
    pub fn from_env() -> Result<Self, ParleyError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let file = match std::env::var_os("PARLEY_CONFIG") {
            Some(path) => Some(Self::load_file(Path::new(&path))?),
            None => match default_config_path() {
                Some(path) if path.exists() => Some(Self::load_file(&path)?),
                _ => None,
            },
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Combine a file layer with an environment lookup; the environment wins.
    pub fn from_sources(
        file: Option<FileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ParleyError> {
        let file = file.unwrap_or_default();
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::new();

        config.api_key = env("OPENAI_API_KEY").or(file.openai_api_key);
        config.base_url = env("OPENAI_BASE_URL").or(file.openai_base_url);
        if let Some(model) = env("PARLEY_MODEL").or(file.model) {
            config.model = model;
        }
        if let Some(raw) = env("PARLEY_TEMPERATURE") {
            config.temperature = parse_value("PARLEY_TEMPERATURE", &raw)?;
        } else if let Some(temperature) = file.temperature {
            config.temperature = temperature;
        }
        if let Some(raw) = env("PARLEY_BIND").or(file.bind) {
            config.bind = parse_value("PARLEY_BIND", &raw)?;
        }
        let keepalive_secs = match env("PARLEY_KEEPALIVE_SECS") {
            Some(raw) => Some(parse_value::<u64>("PARLEY_KEEPALIVE_SECS", &raw)?),
            None => file.keepalive_secs,
        };
        if let Some(secs) = keepalive_secs {
            if secs == 0 {
                return Err(ParleyError::Configuration(
                    "PARLEY_KEEPALIVE_SECS must be positive".into(),
                ));
            }
            config.keepalive_interval = Duration::from_secs(secs);
        }
        config.data_dir = env("PARLEY_DATA_DIR").map(PathBuf::from).or(file.data_dir);
        let replay = match env("PARLEY_FALLBACK_REPLAY_HISTORY") {
            Some(raw) => parse_value::<bool>("PARLEY_FALLBACK_REPLAY_HISTORY", &raw)?,
            None => file.fallback_replay_history.unwrap_or(false),
        };
        if replay {
            config.fallback_policy = FallbackPolicy::ReplayHistory;
        }
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn load_file(path: &Path) -> Result<FileConfig, ParleyError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ParleyError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            ParleyError::Configuration(format!("invalid config {}: {e}", path.display()))
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Settings for model calls.
    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings::builder()
            .temperature(self.temperature)
            .build()
    }

    /// Settings for streaming sessions.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings::builder()
            .keepalive_interval(self.keepalive_interval)
            .fallback_policy(self.fallback_policy)
            .build()
    }
}

impl CredentialCheck for ParleyConfig {
    fn has_execution_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// `parley.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "parley", "parley")
        .map(|dirs| dirs.config_dir().join("parley.toml"))
}

/// Platform data directory for the file store.
pub fn default_data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "parley", "parley")
        .map(|dirs| dirs.data_dir().join("threads"))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ParleyError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ParleyError::Configuration(format!("invalid {key} '{raw}': {e}")))
}
