//! Named language model handle shared by every actor of a run.

use std::fmt;
use std::sync::Arc;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message};

/// Default cap on generated tokens per turn.
pub const DEFAULT_MAX_TOKENS: u32 = 300;

/// A `(system, message)` prompt pair sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub message: String,
}

impl PromptPair {
    pub fn new(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            message: message.into(),
        }
    }

    fn into_messages(self) -> Vec<Message> {
        vec![Message::system(self.system), Message::user(self.message)]
    }
}

/// A promptable model with a human-readable name.
///
/// Built once per run and handed to actors as `Arc<LanguageModel>`.
/// Substrings listed in `disallowed_strings` are removed from every reply
/// before it reaches the caller.
pub struct LanguageModel {
    name: String,
    model_id: String,
    provider: Arc<dyn LlmProvider>,
    max_tokens: u32,
    temperature: Option<f64>,
    top_p: Option<f64>,
    disallowed_strings: Vec<String>,
}

impl fmt::Debug for LanguageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageModel")
            .field("name", &self.name)
            .field("model_id", &self.model_id)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("disallowed_strings", &self.disallowed_strings)
            .finish_non_exhaustive()
    }
}

impl LanguageModel {
    /// Wrap `provider` under the given display name and backend model id.
    pub fn new(
        name: impl Into<String>,
        model_id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            model_id: model_id.into(),
            provider,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            top_p: None,
            disallowed_strings: Vec::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_disallowed_strings(mut self, strings: Vec<String>) -> Self {
        self.disallowed_strings = strings;
        self
    }

    /// Display name recorded in transcripts.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier sent to the backend.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn disallowed_strings(&self) -> &[String] {
        &self.disallowed_strings
    }

    /// Send a prompt pair to the backend and return the cleaned reply.
    pub async fn prompt<S: AsRef<str>>(
        &self,
        prompt: PromptPair,
        stop: &[S],
    ) -> Result<String, LlmError> {
        let mut request = GenerationRequest::new(self.model_id.clone(), prompt.into_messages())
            .with_max_tokens(self.max_tokens)
            .with_stop(stop);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(top_p) = self.top_p {
            request = request.with_top_p(top_p);
        }

        let response = self.provider.generate(request).await?;
        tracing::debug!(
            model = %self.name,
            completion_tokens = response.usage.completion_tokens,
            "Model responded"
        );

        let content = response.first_content().ok_or_else(|| {
            LlmError::ParseError("Response contained no choices".to_string())
        })?;

        Ok(self.clean(content))
    }

    fn clean(&self, raw: &str) -> String {
        let mut text = raw.to_string();
        for word in &self.disallowed_strings {
            if !word.is_empty() {
                text = text.replace(word.as_str(), "");
            }
        }
        text.trim().to_string()
    }
}
