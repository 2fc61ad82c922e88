use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "relay.toml";
pub const DEFAULT_CONTEXT_CAPACITY: usize = 5;
pub const DEFAULT_RETRY_BUDGET: u32 = 3;
pub const DEFAULT_SHRINK_STEP: usize = 2;
pub const DEFAULT_SENTINEL: &str = "++++";
pub const DEFAULT_ASK_PREFIX: &str = "/ask ";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
/// Largest number of entries a single failed attempt may drop.
pub const MAX_SHRINK_STEP: usize = 2;

/// Top-level config (relay.toml + RELAY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// How the conversation is laid out for the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// System message + user message against the chat completions API.
    #[default]
    Chat,
    /// A single text prompt against the legacy completions API.
    Completion,
}

/// Which inbound messages share one context window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextScope {
    /// One window per chat.
    Chat,
    /// A single window shared by every chat.
    #[default]
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model id. Falls back to a mode-appropriate default when unset.
    pub model: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub prompt_mode: PromptMode,
    #[serde(default = "bool_true")]
    pub stream: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// System text placed before the context.
    pub preamble_path: Option<String>,
    /// Text placed between the context separator and the new message.
    /// Only used in completion mode.
    pub postamble_path: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            base_url: default_openai_base_url(),
            prompt_mode: PromptMode::default(),
            stream: true,
            max_tokens: default_max_tokens(),
            temperature: None,
            request_timeout_secs: default_request_timeout_secs(),
            preamble_path: None,
            postamble_path: None,
        }
    }
}

impl AgentConfig {
    /// The configured model, or the default for the prompt mode.
    pub fn resolved_model(&self) -> String {
        match (&self.model, self.prompt_mode) {
            (Some(m), _) => m.clone(),
            (None, PromptMode::Chat) => "gpt-3.5-turbo".to_string(),
            (None, PromptMode::Completion) => "gpt-3.5-turbo-instruct".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum number of entries kept per window.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub scope: ContextScope,
    /// Total attempts per inbound message, including the first.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Oldest entries dropped after each failed attempt.
    #[serde(default = "default_shrink_step")]
    pub shrink_step: usize,
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Keep the user fragment of suppressed exchanges in the window.
    #[serde(default)]
    pub remember_suppressed: bool,
    /// Directory for per-conversation JSON snapshots. Disabled when unset.
    pub snapshot_dir: Option<String>,
    /// Seed fresh windows from the exchange log.
    #[serde(default)]
    pub rehydrate: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CONTEXT_CAPACITY,
            scope: ContextScope::default(),
            retry_budget: DEFAULT_RETRY_BUDGET,
            shrink_step: DEFAULT_SHRINK_STEP,
            retry_delay_ms: 0,
            remember_suppressed: false,
            snapshot_dir: None,
            rehydrate: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_ask_prefix")]
    pub ask_prefix: String,
    /// When true, only messages starting with `ask_prefix` reach the model.
    #[serde(default)]
    pub require_prefix: bool,
    pub help_path: Option<String>,
    pub banned_path: Option<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            ask_prefix: default_ask_prefix(),
            require_prefix: false,
            help_path: None,
            banned_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_db_path(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_capacity() -> usize {
    DEFAULT_CONTEXT_CAPACITY
}
fn default_retry_budget() -> u32 {
    DEFAULT_RETRY_BUDGET
}
fn default_shrink_step() -> usize {
    DEFAULT_SHRINK_STEP
}
fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}
fn default_ask_prefix() -> String {
    DEFAULT_ASK_PREFIX.to_string()
}
fn default_db_path() -> String {
    "bot.db".to_string()
}

impl RelayConfig {
    /// Load config from a TOML file with RELAY_* env var overrides.
    ///
    /// A missing file is not an error: every section has defaults. Nested keys
    /// in the environment are split on `__` (`RELAY_CONTEXT__CAPACITY=8`).
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);

        let config: RelayConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RELAY_").split("__"))
            .extract()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        config.validate()?;
        tracing::debug!(path, file_found = Path::new(path).exists(), "config loaded");
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.context.capacity == 0 {
            return Err(RelayError::Config("context.capacity must be at least 1".into()));
        }
        if self.context.retry_budget == 0 {
            return Err(RelayError::Config(
                "context.retry_budget must be at least 1".into(),
            ));
        }
        if !(1..=MAX_SHRINK_STEP).contains(&self.context.shrink_step) {
            return Err(RelayError::Config(format!(
                "context.shrink_step must be between 1 and {MAX_SHRINK_STEP}"
            )));
        }
        if self.filter.sentinel.is_empty() {
            return Err(RelayError::Config("filter.sentinel must not be empty".into()));
        }
        if self.agent.request_timeout_secs == 0 {
            return Err(RelayError::Config(
                "agent.request_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Read an optional static text file.
///
/// `None` yields `Ok(None)`; a configured path that cannot be read is fatal.
pub fn read_optional_text(path: Option<&str>) -> Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    std::fs::read_to_string(Path::new(path))
        .map(Some)
        .map_err(|source| RelayError::File {
            path: path.to_string(),
            source,
        })
}
