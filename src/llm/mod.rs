//! LLM integration for discussion-forge.
//!
//! The simulation only needs one capability from a model: turn a
//! `(system, message)` prompt pair plus stop sequences into text. That
//! capability is expressed by [`LanguageModel::prompt`], which sits on top of
//! the [`LlmProvider`] trait implemented by the HTTP backends.
//!
//! ```ignore
//! use discussion_forge::llm::{build_model, BackendKind, ModelConfig, PromptPair};
//!
//! let mut config = ModelConfig::new(BackendKind::LiteLlm, "meta-llama/llama-3.1-8b-instruct");
//! config.api_base = Some("http://localhost:4000".to_string());
//! let model = build_model(&config)?;
//! let reply = model.prompt(PromptPair::new("You are terse.", "Hi"), &["###"]).await?;
//! ```

pub mod factory;
pub mod litellm;
pub mod model;
pub mod providers;

#[cfg(test)]
pub(crate) mod testing;

pub use factory::{build_model, build_provider, model_from_provider, BackendKind, ModelConfig};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
pub use model::{LanguageModel, PromptPair};
pub use providers::OpenRouterProvider;
