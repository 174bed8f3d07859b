//! Configuration loading, validation, and management for memtier.
//!
//! Loads configuration from `~/.memtier/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use memtier_core::agent::ToolErrorPolicy;
use memtier_core::memory::ReplaceMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.memtier/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the chat and embedding endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("memory", &self.memory)
            .field("agent", &self.agent)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Where embeddings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// The `/embeddings` endpoint of the configured provider
    Openai,
    /// Local feature hashing; no network, lower quality
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// OpenAI-compatible API root
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dimensions() -> usize {
    1536
}
fn default_temperature() -> f32 {
    0.7
}
fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Openai
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            temperature: default_temperature(),
            max_tokens: None,
            embedding_backend: default_embedding_backend(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sqlite,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// SQLite database file (ignored by the in-memory backend)
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sqlite
}
fn default_database_path() -> String {
    AppConfig::config_dir()
        .join("memtier.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_path: default_database_path(),
        }
    }
}

/// A core memory section created with a new agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSeed {
    pub name: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Agent looked up (or created) on startup
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Token budget for one assembled prompt
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Model calls allowed per user message
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Hits returned by the search tools
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    #[serde(default)]
    pub replace_mode: ReplaceMode,

    #[serde(default)]
    pub tool_error_policy: ToolErrorPolicy,

    #[serde(default = "default_persona")]
    pub persona: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_initial_sections")]
    pub initial_sections: Vec<SectionSeed>,
}

fn default_agent_name() -> String {
    "memgpt".into()
}
fn default_max_context_tokens() -> usize {
    8000
}
fn default_max_iterations() -> usize {
    10
}
fn default_search_limit() -> usize {
    10
}
fn default_persona() -> String {
    "I am Sam, a friendly and curious AI assistant. I enjoy learning about the people I talk to and remembering details about them.".into()
}
fn default_system_prompt() -> String {
    r#"You are MemGPT, an AI assistant with self-managed memory.

You have access to a working memory (core memory) that is always visible to you. Use it to store important facts.

## Rules
- You MUST call send_message() to communicate with the user. Do NOT respond with plain text.
- Use core_memory_append to save important facts about the user or yourself.
- Use core_memory_replace to update facts that have changed.
- Use conversation_search to find past messages that are no longer in your context.
- Use archival_memory_insert to store detailed notes for long-term reference.
- Use archival_memory_search to retrieve long-term notes.
- Think step by step before responding. Save important information first, then respond.
- Be concise but warm."#
        .into()
}
fn default_initial_sections() -> Vec<SectionSeed> {
    vec![
        SectionSeed {
            name: "human".into(),
            content: String::new(),
        },
        SectionSeed {
            name: "persona".into(),
            content: "I am Sam, a friendly and curious AI assistant.".into(),
        },
    ]
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            max_context_tokens: default_max_context_tokens(),
            max_iterations: default_max_iterations(),
            search_limit: default_search_limit(),
            replace_mode: ReplaceMode::default(),
            tool_error_policy: ToolErrorPolicy::default(),
            persona: default_persona(),
            system_prompt: default_system_prompt(),
            initial_sections: default_initial_sections(),
        }
    }
}

/// Bounds on every collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_chat_secs")]
    pub chat_secs: u64,

    #[serde(default = "default_embedding_secs")]
    pub embedding_secs: u64,

    #[serde(default = "default_storage_secs")]
    pub storage_secs: u64,

    /// Extra attempts after a transient provider failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_chat_secs() -> u64 {
    120
}
fn default_embedding_secs() -> u64 {
    30
}
fn default_storage_secs() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}

impl TimeoutConfig {
    pub fn chat(&self) -> Duration {
        Duration::from_secs(self.chat_secs)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    pub fn storage(&self) -> Duration {
        Duration::from_secs(self.storage_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            chat_secs: default_chat_secs(),
            embedding_secs: default_embedding_secs(),
            storage_secs: default_storage_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.memtier/config.toml).
    ///
    /// Environment variables override the file:
    /// - `MEMTIER_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `MEMTIER_MODEL`, `MEMTIER_BASE_URL`, `MEMTIER_DATABASE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("MEMTIER_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("MEMTIER_MODEL") {
            self.provider.chat_model = model;
        }
        if let Some(url) = lookup("MEMTIER_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(path) = lookup("MEMTIER_DATABASE") {
            self.memory.database_path = path;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".memtier")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.provider.embedding_dimensions == 0 {
            return Err(ConfigError::ValidationError(
                "provider.embedding_dimensions must be > 0".into(),
            ));
        }

        if self.agent.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_context_tokens must be > 0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }

        if self.agent.search_limit == 0 {
            return Err(ConfigError::ValidationError(
                "agent.search_limit must be > 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for section in &self.agent.initial_sections {
            if section.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "agent.initial_sections entries need a name".into(),
                ));
            }
            if !seen.insert(section.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate initial section '{}'",
                    section.name
                )));
            }
        }

        if self.timeouts.chat_secs == 0 || self.timeouts.embedding_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be > 0 seconds".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: ProviderSettings::default(),
            memory: MemoryConfig::default(),
            agent: AgentSettings::default(),
            timeouts: TimeoutConfig::default(),
        }
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
