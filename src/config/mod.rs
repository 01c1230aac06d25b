//! Experiment configuration.
//!
//! A single YAML file describes the model, which actions to run, and the
//! settings of each action. Everything is deserialized into typed structs
//! with defaults and checked by [`ExperimentConfig::validate`] before any
//! model is built.
//!
//! ```yaml
//! model:
//!   backend: litellm
//!   name: llama-3.1-8b
//!   model_id: meta-llama/llama-3.1-8b-instruct
//!   api_base: http://localhost:4000
//! actions:
//!   generate_discussions: true
//!   generate_annotations: true
//!   export_dataset: true
//! discussions:
//!   topics: ["Should remote work be the default?"]
//!   user_personas_path: data/personas.json
//!   output_dir: output/discussions/vanilla
//! annotations:
//!   annotator_personas_path: data/annotators.json
//!   instructions: "Rate the toxicity of the last message from 1 to 5."
//!   output_dir: output/annotations/vanilla
//! export:
//!   conversations_dir: output/discussions
//!   annotations_dir: output/annotations
//!   output_path: output/dataset.parquet
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::ConfigError;
use crate::llm::ModelConfig;
use crate::turn_manager::{TurnManagerConfig, TurnStrategy};

/// Root of the experiment YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub discussions: Option<DiscussionsConfig>,
    #[serde(default)]
    pub annotations: Option<AnnotationsConfig>,
    #[serde(default)]
    pub export: Option<ExportConfig>,
}

/// Which stages a `run` executes, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default)]
    pub generate_discussions: bool,
    #[serde(default)]
    pub generate_annotations: bool,
    #[serde(default)]
    pub export_dataset: bool,
}

impl ActionsConfig {
    pub fn any(&self) -> bool {
        self.generate_discussions || self.generate_annotations || self.export_dataset
    }
}

/// Settings for batch discussion generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionsConfig {
    /// Inline seed topics.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Directory whose files each hold one topic.
    #[serde(default)]
    pub topics_dir: Option<PathBuf>,
    /// JSON file with the user persona pool.
    pub user_personas_path: PathBuf,
    #[serde(default)]
    pub user_instructions: String,
    /// File overriding `user_instructions`.
    #[serde(default)]
    pub user_instructions_path: Option<PathBuf>,
    /// Scene-setting text given to every actor.
    #[serde(default)]
    pub context_prompt: String,
    #[serde(default)]
    pub moderator: Option<ModeratorConfig>,
    #[serde(default = "default_turn_manager")]
    pub turn_manager: TurnStrategy,
    #[serde(default)]
    pub turn_manager_config: TurnManagerConfig,
    #[serde(default = "default_num_discussions")]
    pub num_discussions: usize,
    #[serde(default = "default_num_turns")]
    pub num_turns: usize,
    #[serde(default = "default_num_active_users")]
    pub num_active_users: usize,
    #[serde(default = "default_discussion_ctx_len")]
    pub history_context_len: usize,
    /// Seed for topic and roster sampling.
    #[serde(default)]
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
}

/// The optional moderator of every generated discussion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorConfig {
    #[serde(default = "default_moderator_name")]
    pub username: String,
    /// Free-text traits rendered into the system prompt.
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub instructions_path: Option<PathBuf>,
}

/// Settings for batch annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationsConfig {
    pub annotator_personas_path: PathBuf,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub instructions_path: Option<PathBuf>,
    #[serde(default = "default_annotator_context")]
    pub context_prompt: String,
    #[serde(default = "default_annotation_ctx_len")]
    pub history_context_len: usize,
    #[serde(default = "default_true")]
    pub include_moderator_comments: bool,
    /// Transcript directory. Defaults to `discussions.output_dir`.
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
}

/// Settings for dataset export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub conversations_dir: PathBuf,
    pub annotations_dir: PathBuf,
    pub output_path: PathBuf,
}

fn default_turn_manager() -> TurnStrategy {
    TurnStrategy::RoundRobin
}

fn default_num_discussions() -> usize {
    5
}

fn default_num_turns() -> usize {
    10
}

fn default_num_active_users() -> usize {
    2
}

fn default_discussion_ctx_len() -> usize {
    3
}

fn default_annotation_ctx_len() -> usize {
    2
}

fn default_moderator_name() -> String {
    "moderator".to_string()
}

fn default_annotator_context() -> String {
    "You are a human annotator.".to_string()
}

fn default_true() -> bool {
    true
}

impl ExperimentConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded experiment config");
        Ok(config)
    }

    /// Check cross-field constraints. Does not touch the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;

        if self.actions.generate_discussions {
            let discussions = self.discussions.as_ref().ok_or_else(|| {
                ConfigError::ValidationFailed(
                    "generate_discussions is enabled but no discussions section is set".to_string(),
                )
            })?;
            discussions.validate()?;
        }

        if self.actions.generate_annotations {
            let annotations = self.annotations.as_ref().ok_or_else(|| {
                ConfigError::ValidationFailed(
                    "generate_annotations is enabled but no annotations section is set".to_string(),
                )
            })?;
            annotations.validate()?;
            if self.annotation_input_dir().is_none() {
                return Err(ConfigError::ValidationFailed(
                    "annotations.input_dir is required when no discussions section is set"
                        .to_string(),
                ));
            }
        }

        if self.actions.export_dataset && self.export.is_none() {
            return Err(ConfigError::ValidationFailed(
                "export_dataset is enabled but no export section is set".to_string(),
            ));
        }

        Ok(())
    }

    /// Where annotation jobs read transcripts from.
    pub fn annotation_input_dir(&self) -> Option<PathBuf> {
        self.annotations
            .as_ref()
            .and_then(|a| a.input_dir.clone())
            .or_else(|| self.discussions.as_ref().map(|d| d.output_dir.clone()))
    }
}

impl DiscussionsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.turn_manager == TurnStrategy::RandomWeighted {
            if let Some(p) = self.turn_manager_config.respond_probability {
                if !(p > 0.0 && p < 1.0) {
                    return Err(ConfigError::InvalidProbability(p));
                }
            }
        }
        if self.topics.is_empty() && self.topics_dir.is_none() {
            return Err(ConfigError::ValidationFailed(
                "discussions need either topics or topics_dir".to_string(),
            ));
        }
        if self.num_active_users == 0 {
            return Err(ConfigError::InvalidValue {
                key: "discussions.num_active_users".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.history_context_len == 0 {
            return Err(ConfigError::InvalidValue {
                key: "discussions.history_context_len".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Inline topics followed by the contents of every file in `topics_dir`.
    pub fn load_topics(&self) -> Result<Vec<String>, ConfigError> {
        let mut topics: Vec<String> = self
            .topics
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if let Some(dir) = &self.topics_dir {
            topics.extend(read_text_files(dir)?);
        }

        if topics.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "no discussion topics found".to_string(),
            ));
        }
        Ok(topics)
    }

    pub fn load_user_instructions(&self) -> Result<String, ConfigError> {
        resolve_text(&self.user_instructions, self.user_instructions_path.as_deref())
    }
}

impl ModeratorConfig {
    pub fn load_instructions(&self) -> Result<String, ConfigError> {
        resolve_text(&self.instructions, self.instructions_path.as_deref())
    }
}

impl AnnotationsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instructions.trim().is_empty() && self.instructions_path.is_none() {
            return Err(ConfigError::ValidationFailed(
                "annotations need instructions or instructions_path".to_string(),
            ));
        }
        if self.history_context_len == 0 {
            return Err(ConfigError::InvalidValue {
                key: "annotations.history_context_len".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn load_instructions(&self) -> Result<String, ConfigError> {
        resolve_text(&self.instructions, self.instructions_path.as_deref())
    }
}

/// File contents when a path is set, the inline text otherwise.
fn resolve_text(inline: &str, path: Option<&Path>) -> Result<String, ConfigError> {
    match path {
        Some(path) => Ok(fs::read_to_string(path)?.trim().to_string()),
        None => Ok(inline.trim().to_string()),
    }
}

/// Non-empty contents of every regular file under `dir`, sorted by path.
fn read_text_files(dir: &Path) -> Result<Vec<String>, ConfigError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ConfigError::InvalidValue {
            key: "topics_dir".to_string(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }

    let mut texts = Vec::with_capacity(paths.len());
    for path in paths {
        let text = fs::read_to_string(&path)?;
        let text = text.trim();
        if !text.is_empty() {
            texts.push(text.to_string());
        }
    }
    Ok(texts)
}
