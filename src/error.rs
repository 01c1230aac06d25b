//! Error types for discussion-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Configuration loading and validation
//! - Discussion and annotation simulation
//! - LLM API interactions
//! - Dataset export

use thiserror::Error;

/// Errors that can occur while building or validating configuration.
///
/// These are raised at construction time and are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("There is no turn manager option called '{name}'. Valid values: {valid}")]
    UnknownTurnManager { name: String, valid: String },

    #[error("Respond probability must lie strictly between 0 and 1, got {0}")]
    InvalidProbability(f64),

    #[error("Participant roster is empty")]
    EmptyRoster,

    #[error("Participant '{0}' appears more than once in the roster")]
    DuplicateParticipant(String),

    #[error("Seed opinion author '{0}' is not a participant of the conversation")]
    UnknownSeedAuthor(String),

    #[error("Actor '{name}' has role '{actual}', expected '{expected}'")]
    RoleMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Unknown model backend '{name}'. Valid values: {valid}")]
    UnknownBackend { name: String, valid: String },

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while driving a discussion or an annotation job.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("This conversation has already been concluded, create a new instance")]
    AlreadyConcluded,

    #[error("No usernames have been provided to the turn manager, call initialize() first")]
    TurnManagerUninitialized,

    #[error("Turn manager roster is fixed once initialized")]
    TurnManagerAlreadyInitialized,

    #[error("Turn manager selected '{0}', who is not a participant")]
    UnknownSpeaker(String),

    #[error("Actor '{0}' has no model attached and cannot speak")]
    MissingModel(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: {0} environment variable not set")]
    MissingApiKey(String),

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: u32 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur during dataset export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Input directory does not exist: {0}")]
    MissingDirectory(String),

    #[error("Failed to parse '{path}': {reason}")]
    InvalidRecord { path: String, reason: String },

    #[error("No rows to export")]
    NoRows,

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Directory traversal error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
