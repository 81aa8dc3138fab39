//! Configuration loading, validation, and management for StrideChat.
//!
//! Loads configuration from `~/.stridechat/config.toml` with environment
//! variable overrides. Validates all settings at startup. Every component
//! receives its own immutable section of [`AppConfig`] in its constructor;
//! nothing reads ambient globals.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.stridechat/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model requested from the remote endpoint
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the remote endpoint (one circuit breaker per endpoint)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Base system prompt sent with every remote call
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Deadline for each remote call, in milliseconds
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// PHI sanitizer settings
    #[serde(default)]
    pub sanitizer: SanitizerConfig,

    /// Token budget settings
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Circuit breaker settings
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Response strategy settings
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Session memory settings
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_endpoint() -> String {
    "primary".into()
}
fn default_system_prompt() -> String {
    "You are a friendly support assistant for a step-tracking app. \
     Help the user resolve syncing, permission, battery and step-count issues. \
     Placeholders such as [NUMBER] or [APP] stand in for redacted details; \
     never ask the user to reveal them."
        .into()
}
fn default_remote_timeout_ms() -> u64 {
    15_000
}
fn default_true() -> bool {
    true
}

/// How the sanitizer treats PHI that survives redaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizerPolicy {
    /// Residual PHI blocks transmission.
    #[default]
    Strict,
    /// Residual PHI is redacted best-effort and flagged.
    Permissive,
}

impl std::str::FromStr for SanitizerPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            other => Err(ConfigError::ValidationError(format!(
                "unknown sanitizer policy '{other}' (expected strict or permissive)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanitizerConfig {
    #[serde(default)]
    pub policy: SanitizerPolicy,

    /// Additional application/brand names redacted as `[APP]`
    #[serde(default)]
    pub extra_app_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Context window of the remote model
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    /// Tokens reserved for the response
    #[serde(default = "default_safety_margin")]
    pub safety_margin: usize,

    /// Framing cost added per message
    #[serde(default = "default_per_message_overhead")]
    pub per_message_overhead: usize,

    /// Entries kept in the token-count LRU cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_context_limit() -> usize {
    4096
}
fn default_safety_margin() -> usize {
    512
}
fn default_per_message_overhead() -> usize {
    4
}
fn default_cache_capacity() -> usize {
    1024
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            context_limit: default_context_limit(),
            safety_margin: default_safety_margin(),
            per_message_overhead: default_per_message_overhead(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures inside the window that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive probe successes that close it again
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Time spent open before a probe is admitted
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Sliding window over which failures are counted
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_cooldown_ms() -> u64 {
    60_000
}
fn default_failure_window_ms() -> u64 {
    60_000
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_ms: default_cooldown_ms(),
            failure_window_ms: default_failure_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Below this classifier confidence the LLM answers
    #[serde(default = "default_template_confidence_threshold")]
    pub template_confidence_threshold: f32,

    /// Conversations longer than this many user turns go to the LLM
    #[serde(default = "default_multi_turn_threshold")]
    pub multi_turn_threshold: usize,

    /// Let frustration route greetings/thanks/farewells to the LLM
    #[serde(default)]
    pub frustration_overrides_simple_intents: bool,

    /// Relative cost units of a full LLM answer
    #[serde(default = "default_llm_cost")]
    pub llm_cost: f64,

    /// Relative cost units of a template plus LLM fragment
    #[serde(default = "default_hybrid_cost")]
    pub hybrid_cost: f64,
}

fn default_template_confidence_threshold() -> f32 {
    0.85
}
fn default_multi_turn_threshold() -> usize {
    3
}
fn default_llm_cost() -> f64 {
    1.0
}
fn default_hybrid_cost() -> f64 {
    0.35
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            template_confidence_threshold: default_template_confidence_threshold(),
            multi_turn_threshold: default_multi_turn_threshold(),
            frustration_overrides_simple_intents: false,
            llm_cost: default_llm_cost(),
            hybrid_cost: default_hybrid_cost(),
        }
    }
}

/// When the durable write happens relative to `add_message`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// Awaited inside the session lock.
    #[default]
    Sync,
    /// Spawned onto the runtime; `add_message` returns immediately.
    FireAndForget,
}

/// Which message store backs session memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    File,
    Sqlite,
    Memory,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Messages retained per session
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    #[serde(default)]
    pub persistence: PersistenceMode,

    #[serde(default)]
    pub backend: StoreBackend,

    /// Where file/SQLite stores live (defaults to `~/.stridechat/data`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Sessions idle longer than this are dropped from memory
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Sort hydrated history by timestamp before trimming
    #[serde(default = "default_true")]
    pub sort_on_hydrate: bool,
}

fn default_max_messages() -> usize {
    20
}
fn default_idle_ttl_secs() -> u64 {
    1800
}

impl MemoryConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            persistence: PersistenceMode::default(),
            backend: StoreBackend::default(),
            data_dir: None,
            idle_ttl_secs: default_idle_ttl_secs(),
            sort_on_hydrate: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.stridechat/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `STRIDECHAT_MODEL`
    /// - `STRIDECHAT_SANITIZER_POLICY`
    /// - `STRIDECHAT_DATA_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_path())
    }

    /// [`load_from`](Self::load_from) plus environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
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

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(model) = std::env::var("STRIDECHAT_MODEL") {
            self.model = model;
        }
        if let Ok(policy) = std::env::var("STRIDECHAT_SANITIZER_POLICY") {
            self.sanitizer.policy = policy.parse()?;
        }
        if let Ok(dir) = std::env::var("STRIDECHAT_DATA_DIR") {
            self.memory.data_dir = Some(dir);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stridechat")
    }

    /// Directory holding persisted sessions.
    pub fn data_dir(&self) -> PathBuf {
        match &self.memory.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => Self::config_dir().join("data"),
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "breaker thresholds must be at least 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.strategy.template_confidence_threshold) {
            return Err(ConfigError::ValidationError(
                "template_confidence_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.strategy.hybrid_cost <= 0.0 || self.strategy.hybrid_cost >= self.strategy.llm_cost {
            return Err(ConfigError::ValidationError(
                "hybrid_cost must be positive and below llm_cost".into(),
            ));
        }

        if self.tokens.safety_margin >= self.tokens.context_limit {
            return Err(ConfigError::ValidationError(
                "safety_margin must be smaller than context_limit".into(),
            ));
        }

        if self.memory.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "max_messages must be at least 1".into(),
            ));
        }

        if self.remote_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "remote_timeout_ms must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            endpoint: default_endpoint(),
            system_prompt: default_system_prompt(),
            remote_timeout_ms: default_remote_timeout_ms(),
            sanitizer: SanitizerConfig::default(),
            tokens: TokenConfig::default(),
            breaker: BreakerConfig::default(),
            strategy: StrategyConfig::default(),
            memory: MemoryConfig::default(),
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
