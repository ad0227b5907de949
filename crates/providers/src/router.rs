//! Model router: builds chat models from configuration and looks them up by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reagent_config::{AppConfig, ConfigError, FormatterKind, ModelConfig};
use reagent_core::provider::{Formatter, Transport};
use tracing::{info, warn};

use crate::anthropic::AnthropicFormatter;
use crate::dashscope::DashScopeFormatter;
use crate::gemini::GeminiFormatter;
use crate::model::ChatModel;
use crate::multi_agent::MultiAgentFormatter;
use crate::openai::OpenAiFormatter;
use crate::transport::HttpTransport;

/// Named chat models with a default.
pub struct ModelRouter {
    models: HashMap<String, Arc<ChatModel>>,
    default_model: String,
}

impl ModelRouter {
    /// Create a new router with a default model name.
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            models: HashMap::new(),
            default_model: default_model.into(),
        }
    }

    /// Register a model.
    pub fn register(&mut self, name: impl Into<String>, model: Arc<ChatModel>) {
        self.models.insert(name.into(), model);
    }

    /// Get the default model.
    pub fn default(&self) -> Option<Arc<ChatModel>> {
        self.models.get(&self.default_model).cloned()
    }

    /// Get a specific model by name.
    pub fn get(&self, name: &str) -> Option<Arc<ChatModel>> {
        self.models.get(name).cloned()
    }

    /// List all registered model names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Formatter for a family. With a speaker, history from everyone else is
/// flattened.
fn formatter_for(kind: FormatterKind, speaker: Option<&str>) -> Arc<dyn Formatter> {
    fn wrap<F: Formatter + 'static>(inner: F, speaker: Option<&str>) -> Arc<dyn Formatter> {
        match speaker {
            Some(speaker) => Arc::new(MultiAgentFormatter::new(inner).with_speaker(speaker)),
            None => Arc::new(inner),
        }
    }

    match kind {
        FormatterKind::OpenAi => wrap(OpenAiFormatter::new(), speaker),
        FormatterKind::Anthropic => wrap(AnthropicFormatter::new(), speaker),
        FormatterKind::Gemini => wrap(GeminiFormatter::new(), speaker),
        FormatterKind::DashScope => wrap(DashScopeFormatter::new(), speaker),
    }
}

fn transport_for(kind: FormatterKind, base_url: &str, api_key: String, timeout: Duration) -> HttpTransport {
    match kind {
        FormatterKind::OpenAi => HttpTransport::openai(base_url, api_key, timeout),
        FormatterKind::Anthropic => HttpTransport::anthropic(base_url, api_key, timeout),
        FormatterKind::Gemini => HttpTransport::gemini(base_url, api_key, timeout),
        FormatterKind::DashScope => HttpTransport::dashscope(base_url, api_key, timeout),
    }
}

/// Build one chat model from its configuration entry.
///
/// `speaker` is the agent the model answers for; with `multi_agent` set, its
/// own turns stay native while other speakers are flattened into history.
pub fn build_model(name: &str, config: &ModelConfig, speaker: &str) -> Result<ChatModel, ConfigError> {
    let kind = config.formatter_kind()?;
    let base_url = config.resolved_api_url()?;

    let api_key = config.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        warn!(model = name, env = kind.api_key_env(), "No API key configured");
    }

    let transport: Arc<dyn Transport> = Arc::new(transport_for(
        kind,
        &base_url,
        api_key,
        Duration::from_secs(config.timeout_secs),
    ));

    let formatter = formatter_for(kind, config.multi_agent.then_some(speaker));
    Ok(ChatModel::new(name, &config.model, formatter, transport).with_options(config.generate_options()))
}

/// Build every configured model.
pub fn build_from_config(config: &AppConfig) -> Result<ModelRouter, ConfigError> {
    let mut router = ModelRouter::new(&config.default_model);

    for (name, model_config) in &config.models {
        let model = build_model(name, model_config, &config.agent.name)?;
        info!(model = %name, formatter = %model_config.formatter, "Registered model");
        router.register(name.clone(), Arc::new(model));
    }

    if router.default().is_none() {
        return Err(ConfigError::UnknownModel(config.default_model.clone()));
    }

    Ok(router)
}
