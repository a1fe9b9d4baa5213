//! Configuration management for the relay services.
//!
//! Service settings live in `~/.qqbot/config.json`. Chat behavior settings
//! (model, history windows, prompts) are a separate [`ChatConfig`] document
//! persisted next to the rest of the relay data so the admin API can edit it
//! at runtime.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `OPENAI_API_KEY` → llm.api_key
//! - `OPENAI_BASE_URL` → llm.base_url
//! - `WS_PORT` → services.gateway.port
//! - `API_PORT` → services.api.port
//! - `QQBOT_BIND_ADDRESS` → network.bind
//! - `QQBOT_DATA_DIR` → storage.data_dir
//! - `QQBOT_LOG_LEVEL` → observability.log_level
//! - `QQBOT_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default port the gateway's reverse WebSocket connects to.
pub const DEFAULT_GATEWAY_PORT: u16 = 3001;

/// Default port of the admin HTTP API.
pub const DEFAULT_API_PORT: u16 = 3002;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".qqbot"),
        |dirs| dirs.home_dir().join(".qqbot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network Configuration
// ============================================================================

/// Global network configuration.
///
/// Default bind is `127.0.0.1` (local only). The gateway usually runs on the
/// same host; set `0.0.0.0` when it does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

// ============================================================================
// Services Port Configuration
// ============================================================================

/// Listening ports for the two surfaces of the relay.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    /// Reverse WebSocket the IM gateway connects to
    #[serde(default)]
    pub gateway: ServicePortConfig,

    /// Admin HTTP API
    #[serde(default)]
    pub api: ServicePortConfig,
}

/// Individual service port configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicePortConfig {
    #[serde(default)]
    pub port: Option<u16>,
}

// ============================================================================
// LLM Configuration
// ============================================================================

/// Connection settings for the OpenAI-compatible LLM endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Bearer token
    #[serde(default)]
    pub api_key: String,

    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Extra attempts for chat completions (summaries are never retried)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between chat retries, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    500
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Where personas, chat settings, user records and stats are kept.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Data directory (default: `~/.qqbot/data`)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

// ============================================================================
// Observability Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Service configuration for the relay process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }

        if let Some(port) = lookup("WS_PORT").and_then(|p| p.parse().ok()) {
            self.services.gateway.port = Some(port);
        }
        if let Some(port) = lookup("API_PORT").and_then(|p| p.parse().ok()) {
            self.services.api.port = Some(port);
        }

        if let Some(bind) = lookup("QQBOT_BIND_ADDRESS") {
            self.network.bind = bind;
        }
        if let Some(dir) = lookup("QQBOT_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(level) = lookup("QQBOT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("QQBOT_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Gateway WebSocket port.
    pub fn gateway_port(&self) -> u16 {
        self.services.gateway.port.unwrap_or(DEFAULT_GATEWAY_PORT)
    }

    /// Admin API port.
    pub fn api_port(&self) -> u16 {
        self.services.api.port.unwrap_or(DEFAULT_API_PORT)
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| config_dir().join("data"))
    }
}

// ============================================================================
// Chat Configuration
// ============================================================================

/// Chat behavior settings read by the message pipeline.
///
/// Serialized in camelCase. Missing keys fall back to defaults so partially
/// written files still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    /// Chat completion model
    pub model: String,
    /// Output token cap for chat completions
    pub max_tokens: u32,
    pub temperature: f32,
    /// Conversation turns kept in context; the message window is twice this
    pub max_history_length: usize,
    /// Turns kept verbatim after compression; the kept tail is twice this
    pub summary_threshold: usize,
    /// Prepended to every persona prompt when non-empty
    pub global_prompt: String,
    /// Split long replies into paced messages
    pub enable_stream: bool,
    /// Model for history summaries; `None` uses `model`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_model: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".into(),
            max_tokens: 1000,
            temperature: 0.7,
            max_history_length: 20,
            summary_threshold: 10,
            global_prompt: "你必须遵守以下规则：1. 使用中文回复 2. 回复简洁明了".into(),
            enable_stream: true,
            summary_model: None,
        }
    }
}

impl ChatConfig {
    /// Maximum number of history messages sent with a chat request.
    pub fn history_window(&self) -> usize {
        self.max_history_length.saturating_mul(2)
    }

    /// Number of newest messages preserved verbatim by compression.
    ///
    /// Capped one below the history window so the summary plus the kept tail
    /// always fits back inside it.
    pub fn keep_after_compression(&self) -> usize {
        self.summary_threshold
            .saturating_mul(2)
            .min(self.history_window().saturating_sub(1))
    }

    /// Model used for history summaries.
    pub fn summary_model(&self) -> &str {
        self.summary_model.as_deref().unwrap_or(&self.model)
    }

    /// Return a copy with the non-empty fields of `update` applied.
    pub fn merged(&self, update: ChatConfigUpdate) -> Self {
        let mut next = self.clone();
        if let Some(model) = update.model {
            next.model = model;
        }
        if let Some(max_tokens) = update.max_tokens {
            next.max_tokens = max_tokens;
        }
        if let Some(temperature) = update.temperature {
            next.temperature = temperature;
        }
        if let Some(len) = update.max_history_length {
            next.max_history_length = len;
        }
        if let Some(threshold) = update.summary_threshold {
            next.summary_threshold = threshold;
        }
        if let Some(prompt) = update.global_prompt {
            next.global_prompt = prompt;
        }
        if let Some(enable) = update.enable_stream {
            next.enable_stream = enable;
        }
        if let Some(summary_model) = update.summary_model {
            next.summary_model = if summary_model.trim().is_empty() {
                None
            } else {
                Some(summary_model)
            };
        }
        next
    }
}

/// Partial update of [`ChatConfig`] as posted by the admin API.
///
/// Unknown keys (including `apiKey` / `baseURL`) are ignored; LLM credentials
/// come from the service configuration only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfigUpdate {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub max_history_length: Option<usize>,
    pub summary_threshold: Option<usize>,
    pub global_prompt: Option<String>,
    pub enable_stream: Option<bool>,
    pub summary_model: Option<String>,
}
