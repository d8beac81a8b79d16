//! Configuration loading, validation, and management for Stockwise.
//!
//! Loads configuration from `~/.stockwise/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.stockwise/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key shared by remote backends that don't set their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// The reasoning model
    #[serde(default = "default_model_backend")]
    pub model: BackendConfig,

    /// The cheaper model used only for conversation summaries
    #[serde(default = "default_summary_backend")]
    pub summary_model: BackendConfig,

    /// Loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Policy middleware settings
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Where thread state is kept between turns
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

fn default_model_backend() -> BackendConfig {
    BackendConfig::Openai(RemoteBackendConfig::new("gpt-4o-mini"))
}

fn default_summary_backend() -> BackendConfig {
    BackendConfig::Gemini(RemoteBackendConfig::new("gemini-2.5-flash"))
}

fn default_true() -> bool {
    true
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
            .field("model", &self.model)
            .field("summary_model", &self.summary_model)
            .field("agent", &self.agent)
            .field("retry", &self.retry)
            .field("middleware", &self.middleware)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

// ── Backends ───────────────────────────────────────────────────────────

/// Which model backend to talk to, and how.
///
/// Tagged by `backend` in TOML:
///
/// ```toml
/// [model]
/// backend = "openai"
/// model = "gpt-4o-mini"
/// temperature = 0.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    /// OpenAI Chat Completions
    Openai(RemoteBackendConfig),
    /// Google Gemini through its OpenAI-compatible endpoint
    Gemini(RemoteBackendConfig),
    /// A local Ollama server
    Ollama(RemoteBackendConfig),
    /// Any other OpenAI-compatible server (`base_url` required)
    Compatible(RemoteBackendConfig),
    /// In-process GGUF inference
    Local(LocalBackendConfig),
}

impl BackendConfig {
    /// Short backend label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Openai(_) => "openai",
            Self::Gemini(_) => "gemini",
            Self::Ollama(_) => "ollama",
            Self::Compatible(_) => "compatible",
            Self::Local(_) => "local",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Openai(r) | Self::Gemini(r) | Self::Ollama(r) | Self::Compatible(r) => &r.model,
            Self::Local(l) => &l.model,
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            Self::Openai(r) | Self::Gemini(r) | Self::Ollama(r) | Self::Compatible(r) => {
                r.temperature
            }
            Self::Local(l) => l.temperature,
        }
    }

    pub fn max_tokens(&self) -> Option<u32> {
        match self {
            Self::Openai(r) | Self::Gemini(r) | Self::Ollama(r) | Self::Compatible(r) => {
                r.max_tokens
            }
            Self::Local(l) => l.max_tokens,
        }
    }

    fn set_model(&mut self, model: String) {
        match self {
            Self::Openai(r) | Self::Gemini(r) | Self::Ollama(r) | Self::Compatible(r) => {
                r.model = model
            }
            Self::Local(l) => l.model = model,
        }
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.model().trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "[{section}] model must not be empty"
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature()) {
            return Err(ConfigError::ValidationError(format!(
                "[{section}] temperature must be between 0.0 and 2.0"
            )));
        }
        if self.max_tokens() == Some(0) {
            return Err(ConfigError::ValidationError(format!(
                "[{section}] max_tokens must be > 0"
            )));
        }
        if let Self::Compatible(r) = self {
            if r.base_url.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "[{section}] compatible backend requires base_url"
                )));
            }
        }
        Ok(())
    }
}

/// Settings for an HTTP backend speaking the OpenAI chat format.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteBackendConfig {
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Overrides the top-level key and env vars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Overrides the backend's well-known URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl RemoteBackendConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            api_key: None,
            base_url: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for RemoteBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackendConfig")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Settings for in-process inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    /// Preset alias (e.g. "qwen:0.5b") or a path to a `.gguf` file
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

// ── Agent loop ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum reasoning cycles per turn
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Wall-clock budget per turn (none = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,

    /// Replaces the built-in analyst persona
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Per-run cap on model calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_calls_per_run: Option<u32>,

    /// Per-run cap on tool calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls_per_run: Option<u32>,
}

fn default_max_steps() -> usize {
    25
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            deadline_secs: None,
            system_prompt: None,
            model_calls_per_run: None,
            tool_calls_per_run: None,
        }
    }
}

/// Exponential backoff for transient model failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Full jitter: sleep a random duration in `0..=delay`
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

// ── Middleware ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub summarization: SummarizationConfig,

    #[serde(default)]
    pub trim: TrimConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub pii: PiiConfig,

    #[serde(default)]
    pub prune: PruneConfig,

    #[serde(default)]
    pub content_policy: ContentPolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Trim once the history is longer than this
    #[serde(default = "default_keep_threshold")]
    pub keep_threshold: usize,
}

fn default_keep_threshold() -> usize {
    3
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_threshold: default_keep_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Case-insensitive regex deny-list
    #[serde(default = "default_sensitive_patterns")]
    pub patterns: Vec<String>,

    /// Reply appended when a pattern matches
    #[serde(default = "default_security_warning")]
    pub warning: String,
}

fn default_sensitive_patterns() -> Vec<String> {
    vec![
        "password".into(),
        "api[_-]?key".into(),
        "secret".into(),
        "주민등록번호".into(),
        "internal".into(),
        "confidential".into(),
    ]
}

fn default_security_warning() -> String {
    "보안 정책 위반 가능성이 있는 내용이 감지되었습니다!!!\n\
     비밀번호, API 키, 주민등록번호 등 민감한 정보를 포함하지 말아주세요."
        .into()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: default_sensitive_patterns(),
            warning: default_security_warning(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prune once the history is longer than this
    #[serde(default = "default_prune_bound")]
    pub bound: usize,
}

fn default_prune_bound() -> usize {
    2
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bound: default_prune_bound(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPolicyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Case-insensitive substrings that get a message removed
    #[serde(default = "default_restricted_words")]
    pub words: Vec<String>,
}

fn default_restricted_words() -> Vec<String> {
    [
        "정치", "대통령", "선거", "정부", "야당", "여당", "보수", "진보", "민주당", "국민의힘",
        "정당", "종교", "기독교", "천주교", "불교", "이슬람", "힌두교", "신앙", "예수", "하느님",
        "알라", "교회", "성당", "사찰",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ContentPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            words: default_restricted_words(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Summarize once the estimated history size exceeds this
    #[serde(default = "default_max_tokens_before_summary")]
    pub max_tokens_before_summary: usize,

    /// Most recent messages kept verbatim
    #[serde(default = "default_messages_to_keep")]
    pub messages_to_keep: usize,
}

fn default_max_tokens_before_summary() -> usize {
    4_000
}
fn default_messages_to_keep() -> usize {
    20
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens_before_summary: default_max_tokens_before_summary(),
            messages_to_keep: default_messages_to_keep(),
        }
    }
}

/// What to do with a detected PII span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiStrategy {
    /// Leave the text alone
    Allow,
    /// Replace with a `[REDACTED_*]` marker
    Redact,
    /// Keep only the last four characters
    Mask,
    /// Refuse the request
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_email_strategy")]
    pub email: PiiStrategy,

    #[serde(default = "default_credit_card_strategy")]
    pub credit_card: PiiStrategy,

    #[serde(default = "default_api_key_strategy")]
    pub api_key: PiiStrategy,
}

fn default_email_strategy() -> PiiStrategy {
    PiiStrategy::Redact
}
fn default_credit_card_strategy() -> PiiStrategy {
    PiiStrategy::Mask
}
fn default_api_key_strategy() -> PiiStrategy {
    PiiStrategy::Block
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            email: default_email_strategy(),
            credit_card: default_credit_card_strategy(),
            api_key: default_api_key_strategy(),
        }
    }
}

// ── Checkpoints ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,

    /// Defaults to `~/.stockwise/threads`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl CheckpointConfig {
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("threads"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.stockwise/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `STOCKWISE_API_KEY` (highest priority)
    /// - `OPENAI_API_KEY`
    /// - `GOOGLE_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
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

        let config = Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;

        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("STOCKWISE_API_KEY").ok();
        }
        if let Ok(model) = std::env::var("STOCKWISE_MODEL") {
            self.model.set_model(model);
        }
    }

    /// The API key for a remote backend: its own key, then the top-level
    /// key, then the backend's conventional env var.
    pub fn api_key_for(&self, backend: &BackendConfig) -> Option<String> {
        let (own, env_var) = match backend {
            BackendConfig::Openai(r) => (&r.api_key, Some("OPENAI_API_KEY")),
            BackendConfig::Gemini(r) => (&r.api_key, Some("GOOGLE_API_KEY")),
            BackendConfig::Ollama(r) | BackendConfig::Compatible(r) => (&r.api_key, None),
            BackendConfig::Local(_) => return None,
        };
        own.clone()
            .or_else(|| self.api_key.clone())
            .or_else(|| env_var.and_then(|v| std::env::var(v).ok()))
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stockwise")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate("model")?;
        self.summary_model.validate("summary_model")?;

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "[agent] max_steps must be > 0".into(),
            ));
        }
        if self.agent.deadline_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "[agent] deadline_secs must be > 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "[retry] max_attempts must be >= 1".into(),
            ));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::ValidationError(
                "[retry] backoff_factor must be >= 1.0".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::ValidationError(
                "[retry] max_delay_ms must be >= initial_delay_ms".into(),
            ));
        }

        let summary = &self.middleware.summarization;
        if summary.enabled && summary.messages_to_keep == 0 {
            return Err(ConfigError::ValidationError(
                "[middleware.summarization] messages_to_keep must be > 0".into(),
            ));
        }

        for pattern in &self.middleware.security.patterns {
            if pattern.is_empty() {
                return Err(ConfigError::ValidationError(
                    "[middleware.security] patterns must not be empty strings".into(),
                ));
            }
        }
        if self.middleware.content_policy.words.iter().any(|w| w.is_empty()) {
            return Err(ConfigError::ValidationError(
                "[middleware.content_policy] words must not be empty strings".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available for the reasoning model.
    pub fn has_api_key(&self) -> bool {
        self.api_key_for(&self.model).is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model_backend(),
            summary_model: default_summary_backend(),
            agent: AgentConfig::default(),
            retry: RetryConfig::default(),
            middleware: MiddlewareConfig::default(),
            checkpoint: CheckpointConfig::default(),
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

impl From<ConfigError> for stockwise_core::Error {
    fn from(e: ConfigError) -> Self {
        stockwise_core::Error::Config {
            message: e.to_string(),
        }
    }
}
