//! Hosted LLM backends beyond the LiteLLM-compatible client.

pub mod openrouter;

pub use openrouter::OpenRouterProvider;
