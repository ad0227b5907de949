//! Configuration loading, validation, and management for Reagent.
//!
//! Loads configuration from `~/.reagent/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use reagent_core::GenerateOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.reagent/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Name of the entry in `models` used when none is given
    #[serde(default = "default_model_name")]
    pub default_model: String,

    /// ReAct loop settings
    #[serde(default)]
    pub agent: AgentSection,

    /// Named model endpoints
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

fn default_model_name() -> String {
    "default".into()
}

/// `[agent]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Maximum reasoning/acting rounds per call (safety limit)
    #[serde(default = "default_max_iters")]
    pub max_iters: u32,

    /// Run the tool calls of one turn concurrently
    #[serde(default)]
    pub parallel_tool_calls: bool,

    /// Request streamed responses from the provider
    #[serde(default)]
    pub stream: bool,

    /// Reply returned when the agent is interrupted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_message: Option<String>,

    /// Per-tool timeout; unset means no limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_secs: Option<u64>,
}

fn default_agent_name() -> String {
    "assistant".into()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".into()
}
fn default_max_iters() -> u32 {
    10
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            system_prompt: default_system_prompt(),
            max_iters: default_max_iters(),
            parallel_tool_calls: false,
            stream: false,
            interrupt_message: None,
            tool_timeout_secs: None,
        }
    }
}

/// Provider wire format families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatterKind {
    OpenAi,
    Anthropic,
    Gemini,
    DashScope,
}

impl FormatterKind {
    pub const ALL: [FormatterKind; 4] = [
        FormatterKind::OpenAi,
        FormatterKind::Anthropic,
        FormatterKind::Gemini,
        FormatterKind::DashScope,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "gemini" => Some(Self::Gemini),
            "dashscope" => Some(Self::DashScope),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::DashScope => "dashscope",
        }
    }

    /// Environment variable holding this family's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::DashScope => "DASHSCOPE_API_KEY",
        }
    }

    pub fn default_api_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::DashScope => "https://dashscope.aliyuncs.com/api/v1",
        }
    }
}

impl fmt::Display for FormatterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[models.<name>]` section.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// "openai" | "anthropic" | "gemini" | "dashscope"
    pub formatter: String,

    /// Provider model id (e.g. "gpt-4o", "qwen-max")
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Flatten other speakers into a history block
    #[serde(default)]
    pub multi_agent: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl ModelConfig {
    pub fn new(formatter: FormatterKind, model: impl Into<String>) -> Self {
        Self {
            formatter: formatter.as_str().into(),
            model: model.into(),
            api_url: None,
            api_key: None,
            multi_agent: false,
            temperature: None,
            max_tokens: None,
            thinking_budget: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn formatter_kind(&self) -> Result<FormatterKind, ConfigError> {
        FormatterKind::parse(&self.formatter).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "unknown formatter '{}' (expected one of: openai, anthropic, gemini, dashscope)",
                self.formatter
            ))
        })
    }

    /// Configured URL, or the family default.
    pub fn resolved_api_url(&self) -> Result<String, ConfigError> {
        Ok(match &self.api_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => self.formatter_kind()?.default_api_url().to_string(),
        })
    }

    /// Generation parameters for every request to this model.
    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            thinking_budget: self.thinking_budget,
            ..GenerateOptions::default()
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

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("formatter", &self.formatter)
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("multi_agent", &self.multi_agent)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("thinking_budget", &self.thinking_budget)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.reagent/config.toml).
    ///
    /// Environment variables override the file:
    /// - `REAGENT_MODEL` selects the default model entry
    /// - `REAGENT_API_KEY` fills a missing key on the default model
    /// - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`,
    ///   `DASHSCOPE_API_KEY` fill missing keys per formatter family
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file path, with environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_from_with(path, |key| std::env::var(key).ok())
    }

    /// Load from `path`, apply overrides from `lookup`, then validate.
    pub fn load_from_with<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::read_file(path)?;
        config.apply_env(lookup);
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("REAGENT_MODEL") {
            self.default_model = model;
        }

        let generic = lookup("REAGENT_API_KEY");
        for (name, model) in self.models.iter_mut() {
            if model.api_key.is_some() {
                continue;
            }
            if name == &self.default_model && generic.is_some() {
                model.api_key = generic.clone();
                continue;
            }
            if let Some(kind) = FormatterKind::parse(&model.formatter) {
                model.api_key = lookup(kind.api_key_env());
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".reagent")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iters < 1 {
            return Err(ConfigError::ValidationError(
                "agent.max_iters must be at least 1".into(),
            ));
        }

        if self.agent.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agent.name must not be empty".into(),
            ));
        }

        if !self.models.contains_key(&self.default_model) {
            return Err(ConfigError::UnknownModel(self.default_model.clone()));
        }

        for (name, model) in &self.models {
            model.formatter_kind().map_err(|e| match e {
                ConfigError::ValidationError(reason) => {
                    ConfigError::ValidationError(format!("models.{name}: {reason}"))
                }
                other => other,
            })?;

            if let Some(t) = model.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::ValidationError(format!(
                        "models.{name}.temperature must be between 0.0 and 2.0"
                    )));
                }
            }

            if model.model.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "models.{name}.model must not be empty"
                )));
            }
        }

        Ok(())
    }

    /// The model entry named by `default_model`.
    pub fn default_model_config(&self) -> Result<&ModelConfig, ConfigError> {
        self.model(&self.default_model)
    }

    pub fn model(&self, name: &str) -> Result<&ModelConfig, ConfigError> {
        self.models
            .get(name)
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            default_model_name(),
            ModelConfig::new(FormatterKind::OpenAi, "gpt-4o"),
        );
        Self {
            default_model: default_model_name(),
            agent: AgentSection::default(),
            models,
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

    #[error("No model named '{0}' in [models]")]
    UnknownModel(String),
}

impl From<ConfigError> for reagent_core::Error {
    fn from(e: ConfigError) -> Self {
        reagent_core::Error::Config {
            message: e.to_string(),
        }
    }
}
