//! discussion-forge: synthetic multi-party LLM discussions and annotations.
//!
//! LLM-driven personas take turns in an online discussion seeded with an
//! opinion, optionally guided by a moderator. Finished transcripts are then
//! labelled message by message by LLM annotators, and both are joined into a
//! Parquet dataset.

pub mod actors;
pub mod annotation;
pub mod cli;
pub mod config;
pub mod discussion;
pub mod error;
pub mod experiments;
pub mod export;
pub mod llm;
pub mod persona;
pub mod transcript;
pub mod turn_manager;

// Re-export commonly used error types
pub use error::{ConfigError, ExportError, LlmError, SimulationError};

pub use actors::{Actor, ActorRole};
pub use annotation::AnnotationConv;
pub use discussion::{Conversation, ConversationBuilder, RunState};
pub use experiments::{AnnotationExperiment, DiscussionExperiment, ExperimentReport};
pub use llm::{LanguageModel, LlmProvider};
pub use persona::Persona;
pub use turn_manager::{turn_manager_factory, TurnManager, TurnStrategy};
