//! Model backend selection.
//!
//! A run names its backend with a string tag in the experiment config; this
//! module resolves the tag to a [`BackendKind`] and builds the shared
//! [`LanguageModel`] handle.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::llm::model::{LanguageModel, DEFAULT_MAX_TOKENS};
use crate::llm::providers::openrouter::{OpenRouterProvider, OPENROUTER_API_KEY_ENV};
use crate::llm::{LiteLlmClient, LlmProvider};

/// Environment variable with the LiteLLM base URL.
pub const LITELLM_API_BASE_ENV: &str = "LITELLM_API_BASE";

/// Environment variable with the LiteLLM API key.
pub const LITELLM_API_KEY_ENV: &str = "LITELLM_API_KEY";

/// Supported model backends. Deserialized case-insensitively from the
/// config's `backend` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    /// OpenAI-compatible `/chat/completions` endpoint (LiteLLM proxy, vLLM, llama.cpp server).
    LiteLlm,
    /// Hosted models through OpenRouter.
    OpenRouter,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::LiteLlm, BackendKind::OpenRouter];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::LiteLlm => "litellm",
            BackendKind::OpenRouter => "openrouter",
        }
    }

    fn valid_values() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "litellm" => Ok(BackendKind::LiteLlm),
            "openrouter" => Ok(BackendKind::OpenRouter),
            _ => Err(ConfigError::UnknownBackend {
                name: s.to_string(),
                valid: Self::valid_values(),
            }),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Model section of the experiment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend tag (`litellm` or `openrouter`).
    pub backend: BackendKind,
    /// Display name recorded in transcripts.
    pub name: String,
    /// Identifier sent to the backend.
    pub model_id: String,
    /// Base URL override. Falls back to `LITELLM_API_BASE` for `litellm`.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff, in `(0, 1]`.
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Substrings removed from every model reply.
    #[serde(default)]
    pub disallowed_strings: Vec<String>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl ModelConfig {
    pub fn new(backend: BackendKind, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            backend,
            name: model_id.clone(),
            model_id,
            api_base: None,
            api_key_env: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            top_p: None,
            disallowed_strings: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "model.model_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "model.max_tokens".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::InvalidValue {
                    key: "model.temperature".to_string(),
                    message: format!("{} is outside 0.0..=2.0", t),
                });
            }
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    key: "model.top_p".to_string(),
                    message: format!("{} is outside (0, 1]", p),
                });
            }
        }
        Ok(())
    }
}

/// Build the provider for `config`, reading credentials from the environment.
pub fn build_provider(config: &ModelConfig) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    match config.backend {
        BackendKind::LiteLlm => {
            let api_base = match &config.api_base {
                Some(base) => base.clone(),
                None => env::var(LITELLM_API_BASE_ENV)
                    .map_err(|_| ConfigError::MissingEnvVar(LITELLM_API_BASE_ENV.to_string()))?,
            };
            let key_env = config.api_key_env.as_deref().unwrap_or(LITELLM_API_KEY_ENV);
            let api_key = env::var(key_env).ok();
            Ok(Arc::new(LiteLlmClient::new(
                api_base,
                api_key,
                config.model_id.clone(),
            )))
        }
        BackendKind::OpenRouter => {
            let key_env = config
                .api_key_env
                .as_deref()
                .unwrap_or(OPENROUTER_API_KEY_ENV);
            let provider =
                OpenRouterProvider::from_env(Some(key_env), config.model_id.clone())
                    .map_err(|_| ConfigError::MissingEnvVar(key_env.to_string()))?;
            let provider = match &config.api_base {
                Some(base) => provider.with_base_url(base.clone()),
                None => provider,
            };
            Ok(Arc::new(provider))
        }
    }
}

/// Build the shared model handle for a run.
pub fn build_model(config: &ModelConfig) -> Result<Arc<LanguageModel>, ConfigError> {
    config.validate()?;
    let provider = build_provider(config)?;
    Ok(Arc::new(model_from_provider(config, provider)))
}

/// Wrap an already constructed provider with the settings from `config`.
pub fn model_from_provider(config: &ModelConfig, provider: Arc<dyn LlmProvider>) -> LanguageModel {
    let mut model = LanguageModel::new(config.name.clone(), config.model_id.clone(), provider)
        .with_max_tokens(config.max_tokens)
        .with_disallowed_strings(config.disallowed_strings.clone());
    if let Some(t) = config.temperature {
        model = model.with_temperature(t);
    }
    if let Some(p) = config.top_p {
        model = model.with_top_p(p);
    }
    tracing::info!(
        backend = %config.backend,
        model = %config.model_id,
        name = %config.name,
        "Model initialized"
    );
    model
}
