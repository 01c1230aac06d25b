//! OpenRouter backend.
//!
//! OpenRouter exposes many hosted models behind one OpenAI-compatible
//! endpoint. Transient failures (timeouts, 5xx, 429) are retried with
//! exponential backoff; everything else fails immediately.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::env;
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::litellm::{api_error_from_body, parse_api_response};
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider, Message};

/// Default OpenRouter API endpoint.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Environment variable holding the API key.
pub const OPENROUTER_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Default model to use if none specified.
const DEFAULT_MODEL: &str = "meta-llama/llama-3.1-8b-instruct";

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenRouter provider for LLM requests.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenRouterProvider {
    /// Create a provider for `model` using the public OpenRouter endpoint.
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            api_key,
            base_url: OPENROUTER_BASE_URL.to_string(),
            default_model: model,
        }
    }

    /// Create a provider reading the key from `key_env`
    /// (`OPENROUTER_API_KEY` when `None`).
    pub fn from_env(key_env: Option<&str>, model: String) -> Result<Self, LlmError> {
        let var = key_env.unwrap_or(OPENROUTER_API_KEY_ENV);
        let api_key = env::var(var).map_err(|_| LlmError::MissingApiKey(var.to_string()))?;
        Ok(Self::new(api_key, model))
    }

    /// Point the provider at an OpenRouter-compatible proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            "*".repeat(self.api_key.len())
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn execute_with_retry(
        &self,
        request: &ApiRequest,
    ) -> Result<GenerationResponse, LlmError> {
        let mut last_error = None;
        let url = format!("{}/chat/completions", self.base_url);

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s
                let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms,
                    model = %request.model,
                    "Retrying OpenRouter request"
                );
            }

            match self.execute_request(&url, request).await {
                Ok(response) => return Ok(response),
                Err(err) if is_transient_error(&err) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        error = %err,
                        "Transient error, will retry"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LlmError::RequestFailed("Max retries exceeded with no error captured".to_string())
        }))
    }

    async fn execute_request(
        &self,
        url: &str,
        request: &ApiRequest,
    ) -> Result<GenerationResponse, LlmError> {
        let http_response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "discussion-forge")
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|e| LlmError::RequestFailed(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(api_error_from_body(status.as_u16(), body));
        }

        parse_api_response(&body)
    }
}

/// Check if an error is transient and should be retried.
fn is_transient_error(error: &LlmError) -> bool {
    match error {
        LlmError::RequestFailed(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("timeout")
                || msg.contains("timed out")
                || msg.contains("connection")
                || msg.contains("temporarily")
        }
        LlmError::RateLimited(_) => true,
        LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
        _ => false,
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            stop: request.stop,
        };

        self.execute_with_retry(&api_request).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openrouter_provider_new() {
        let provider = OpenRouterProvider::new("test-api-key".to_string(), "m".to_string());

        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
        assert_eq!(provider.default_model(), "m");
        assert_eq!(provider.api_key_masked(), "test...-key");
    }

    #[test]
    fn test_with_base_url_trims_slash() {
        let provider = OpenRouterProvider::new("k".to_string(), "m".to_string())
            .with_base_url("https://proxy.local/v1/");
        assert_eq!(provider.base_url(), "https://proxy.local/v1");
    }

    #[test]
    fn test_from_env_missing_key() {
        let result = OpenRouterProvider::from_env(
            Some("DISCUSSION_FORGE_TEST_UNSET_KEY"),
            DEFAULT_MODEL.to_string(),
        );
        assert!(matches!(
            result,
            Err(LlmError::MissingApiKey(var)) if var == "DISCUSSION_FORGE_TEST_UNSET_KEY"
        ));
    }

    #[test]
    fn test_api_key_masked_short() {
        let provider = OpenRouterProvider::new("abc".to_string(), "m".to_string());
        assert_eq!(provider.api_key_masked(), "***");
    }

    #[test]
    fn test_is_transient_error() {
        assert!(is_transient_error(&LlmError::RateLimited("slow".into())));
        assert!(is_transient_error(&LlmError::ApiError {
            code: 503,
            message: "unavailable".into(),
        }));
        assert!(is_transient_error(&LlmError::RequestFailed(
            "Request timeout".into()
        )));
        assert!(is_transient_error(&LlmError::RequestFailed(
            "Connection refused".into()
        )));
        assert!(!is_transient_error(&LlmError::ApiError {
            code: 400,
            message: "bad".into(),
        }));
        assert!(!is_transient_error(&LlmError::ParseError("json".into())));
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let provider = OpenRouterProvider::new("test-key".to_string(), "test-model".to_string())
            .with_base_url("http://localhost:65535");

        let request = GenerationRequest::new("test-model", vec![Message::user("test")]);
        let result = provider.generate(request).await;

        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }

    #[test]
    fn test_api_request_serialization() {
        let request = ApiRequest {
            model: "test-model".to_string(),
            messages: vec![Message::user("Hello")],
            temperature: Some(0.7),
            max_tokens: Some(1000),
            top_p: None,
            stop: None,
        };

        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(json.contains("\"model\":\"test-model\""));
        assert!(json.contains("\"temperature\":0.7"));
        assert!(!json.contains("top_p"));
        assert!(!json.contains("stop"));
    }
}
