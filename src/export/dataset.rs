//! Flatten transcripts and annotations into dataset rows.
//!
//! Transcript and annotation JSON files are discovered recursively. The name
//! of the directory holding a file is recorded as its variant, so runs with
//! different settings can share one root. Conversation rows are left-joined
//! with annotation rows on `(conv_id, message)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::ExportError;
use crate::persona::Persona;
use crate::transcript::{AnnotationRecord, TranscriptRecord};

/// One message of one transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub conv_id: String,
    pub conv_variant: String,
    pub timestamp: String,
    pub user: String,
    pub message: String,
    pub model: String,
    pub is_moderator: bool,
    pub user_prompt: Option<String>,
    pub ctx_length: u64,
    /// Persona of the speaker, when the transcript recorded it.
    pub persona: Option<Persona>,
}

/// One annotated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRow {
    pub conv_id: String,
    pub annotation_variant: String,
    pub timestamp: String,
    pub annotator_model: String,
    pub annotator_prompt: String,
    pub ctx_length: u64,
    pub message: String,
    pub annotation: String,
    pub annotator_persona: Option<Persona>,
}

/// A conversation row with the annotation it matched, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub conversation: ConversationRow,
    pub annotation: Option<AnnotationRow>,
}

/// Every `.json` file under `dir`, sorted by path.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    if !dir.is_dir() {
        return Err(ExportError::MissingDirectory(dir.display().to_string()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn variant_of(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ExportError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| ExportError::InvalidRecord {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Rows for a single transcript.
pub fn conversation_rows(record: &TranscriptRecord, variant: &str) -> Vec<ConversationRow> {
    record
        .logs
        .iter()
        .map(|turn| {
            let is_moderator = record.moderator.as_deref() == Some(turn.name.as_str());
            let (user_prompt, persona) = if is_moderator {
                (record.moderator_prompt.clone(), record.moderator_persona.clone())
            } else {
                match record.users.iter().position(|u| *u == turn.name) {
                    Some(i) => (
                        record.user_prompts.get(i).cloned(),
                        record.user_personas.get(i).cloned(),
                    ),
                    None => (None, None),
                }
            };

            ConversationRow {
                conv_id: record.id.clone(),
                conv_variant: variant.to_string(),
                timestamp: record.timestamp.clone(),
                user: turn.name.clone(),
                message: turn.text.clone(),
                model: turn.model.clone(),
                is_moderator,
                user_prompt,
                ctx_length: record.ctx_length as u64,
                persona,
            }
        })
        .collect()
}

/// Rows for a single annotation file.
pub fn annotation_rows(record: &AnnotationRecord, variant: &str) -> Vec<AnnotationRow> {
    record
        .logs
        .iter()
        .map(|(message, annotation)| AnnotationRow {
            conv_id: record.conv_id.clone(),
            annotation_variant: variant.to_string(),
            timestamp: record.timestamp.clone(),
            annotator_model: record.annotator_model.clone(),
            annotator_prompt: record.annotator_prompt.clone(),
            ctx_length: record.ctx_length as u64,
            message: message.clone(),
            annotation: annotation.clone(),
            annotator_persona: record.annotator_persona.clone(),
        })
        .collect()
}

pub fn load_conversation_rows(dir: &Path) -> Result<Vec<ConversationRow>, ExportError> {
    let mut rows = Vec::new();
    let files = json_files(dir)?;
    for path in &files {
        let record: TranscriptRecord = parse_file(path)?;
        rows.extend(conversation_rows(&record, &variant_of(path)));
    }
    tracing::debug!(dir = %dir.display(), files = files.len(), rows = rows.len(), "Loaded transcripts");
    Ok(rows)
}

pub fn load_annotation_rows(dir: &Path) -> Result<Vec<AnnotationRow>, ExportError> {
    let mut rows = Vec::new();
    let files = json_files(dir)?;
    for path in &files {
        let record: AnnotationRecord = parse_file(path)?;
        rows.extend(annotation_rows(&record, &variant_of(path)));
    }
    tracing::debug!(dir = %dir.display(), files = files.len(), rows = rows.len(), "Loaded annotations");
    Ok(rows)
}

/// Left join on `(conv_id, message)`. A conversation row matching several
/// annotations yields one row per annotation; an unmatched row is kept once
/// with no annotation.
pub fn merge(conversations: Vec<ConversationRow>, annotations: Vec<AnnotationRow>) -> Vec<DatasetRow> {
    let mut index: HashMap<(String, String), Vec<AnnotationRow>> = HashMap::new();
    for row in annotations {
        index
            .entry((row.conv_id.clone(), row.message.clone()))
            .or_default()
            .push(row);
    }

    let mut merged = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let key = (conversation.conv_id.clone(), conversation.message.clone());
        match index.get(&key) {
            Some(matches) => {
                for annotation in matches {
                    merged.push(DatasetRow {
                        conversation: conversation.clone(),
                        annotation: Some(annotation.clone()),
                    });
                }
            }
            None => merged.push(DatasetRow {
                conversation,
                annotation: None,
            }),
        }
    }
    merged
}

/// Load both directories and join them.
pub fn build_dataset(conversations_dir: &Path, annotations_dir: &Path) -> Result<Vec<DatasetRow>, ExportError> {
    let conversations = load_conversation_rows(conversations_dir)?;
    let annotations = load_annotation_rows(annotations_dir)?;
    Ok(merge(conversations, annotations))
}
