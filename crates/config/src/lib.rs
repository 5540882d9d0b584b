//! Configuration loading and validation for agentwire.
//!
//! Loads configuration from `~/.agentwire/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.agentwire/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream model endpoint
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Per-user chat history
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Bound on one upstream call, in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://maas-api.cn-huabei-1.xf-yun.com/v1".into()
}
fn default_model() -> String {
    "xop3qwen1b7".into()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_upstream_timeout() -> u64 {
    30
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Attempts per tool call, including the first
    #[serde(default = "default_max_tool_attempts")]
    pub max_tool_attempts: u32,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Feed tool results back to the model instead of answering after one round
    #[serde(default)]
    pub continue_after_tools: bool,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_tool_attempts() -> u32 {
    2
}
fn default_tool_timeout() -> u64 {
    15
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_attempts: default_max_tool_attempts(),
            tool_timeout_secs: default_tool_timeout(),
            continue_after_tools: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Which history sink the agent writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    File,
    Memory,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_backend")]
    pub backend: HistoryBackend,

    /// Directory of per-user JSON files; defaults to `~/.agentwire/users`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Oldest entries beyond this many are dropped
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_history_backend() -> HistoryBackend {
    HistoryBackend::File
}
fn default_max_messages() -> usize {
    1000
}

impl HistoryConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("users"))
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            dir: None,
            max_messages: default_max_messages(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentwire/config.toml).
    ///
    /// Environment overrides, highest priority first:
    /// - `AGENTWIRE_API_KEY`, `XUNFEI_API_KEY`, `OPENAI_API_KEY` (only if no key in the file)
    /// - `AGENTWIRE_BASE_URL`, `AGENTWIRE_MODEL`, `PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.upstream.api_key.is_none() {
            self.upstream.api_key = lookup("AGENTWIRE_API_KEY")
                .or_else(|| lookup("XUNFEI_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(url) = lookup("AGENTWIRE_BASE_URL") {
            self.upstream.base_url = url;
        }

        if let Some(model) = lookup("AGENTWIRE_MODEL") {
            self.upstream.model = model;
        }

        if let Some(port) = lookup("PORT") {
            self.gateway.port = port.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("PORT must be a port number, got '{port}'"))
            })?;
        }

        Ok(())
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentwire")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.upstream.temperature) {
            return Err(ConfigError::ValidationError(
                "upstream.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "upstream.timeout_secs must be at least 1".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.max_tool_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_attempts must be at least 1".into(),
            ));
        }
        if self.history.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "history.max_messages must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.upstream.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
