//! Layered application configuration.

use std::path::Path;

use config::{Config, Environment, File};
use secrecy::Secret;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub sandbox: SandboxSettings,
    pub model: ModelConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

/// Agent loop and stop policy settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentConfig {
    pub max_rounds: Option<usize>,
    pub max_tokens_all_turns: Option<u64>,
    pub max_tokens_per_turn: Option<u64>,
    pub stop_words: Vec<String>,
    pub system_prompt: Option<String>,
    pub persist: bool,
    pub max_concurrency: Option<usize>,
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: Some(20),
            max_tokens_all_turns: Some(200_000),
            max_tokens_per_turn: None,
            stop_words: Vec::new(),
            system_prompt: None,
            persist: false,
            max_concurrency: None,
            tool_timeout_secs: 120,
        }
    }
}

/// Which sandbox backend runs code snippets.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Isolated worker process, killable on timeout.
    #[default]
    Process,
    /// Worker thread inside this process, abandoned on timeout.
    Thread,
}

/// Code-execution sandbox settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SandboxSettings {
    pub mode: SandboxMode,
    pub default_timeout_secs: f64,
    pub max_timeout_secs: f64,
    pub worker_path: Option<String>,
    pub max_output_chars: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Process,
            default_timeout_secs: 30.0,
            max_timeout_secs: 300.0,
            worker_path: None,
            max_output_chars: 20_000,
        }
    }
}

/// Chat model settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    #[serde(skip_serializing, default)]
    pub api_key: Option<Secret<String>>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
            max_retries: 3,
            request_timeout_secs: 120,
            api_key: None,
        }
    }
}

/// Remote tool collaborators.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ToolsConfig {
    pub remote: Vec<RemoteToolConfig>,
}

/// One remote tool reached over HTTP.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteToolConfig {
    pub name: String,
    pub description: String,
    pub endpoint: String,
    #[serde(default = "default_remote_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub min_interval_ms: u64,
}

fn default_remote_retries() -> u32 {
    2
}

/// Logging output settings.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from `<dir>/default`, `<dir>/{APP_ENV}`, `<dir>/local`
    /// and `APP__SECTION__KEY` environment variables, on top of the built-in defaults.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from(dir.join("default")).required(false))
            .add_source(File::from(dir.join(&env)).required(false))
            .add_source(File::from(dir.join("local")).required(false))
            // Map APP__SANDBOX__MODE=thread to sandbox.mode
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mut cfg: AppConfig = s.try_deserialize()?;
        if cfg.model.api_key.is_none() {
            cfg.model.api_key = std::env::var("OPENAI_API_KEY").ok().map(Secret::new);
        }
        Ok(cfg)
    }
}
