//! Transcript formatting, the bounded context window and the persisted
//! record formats shared by the discussion and annotation engines.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::persona::Persona;

/// Column at which message bodies are wrapped.
pub const WRAP_WIDTH: usize = 70;

/// Timestamp format used in records and output file names.
pub const TIMESTAMP_FORMAT: &str = "%y-%m-%d-%H-%M";

/// Render a message the way it appears in every prompt history.
///
/// Returns an empty string for a blank message.
pub fn format_chat_message(name: &str, message: &str) -> String {
    if message.trim().is_empty() {
        return String::new();
    }
    format!("User {} posted:\n{}", name, wrap_text(message, WRAP_WIDTH))
}

/// Greedy word wrap. Whitespace runs (newlines included) collapse to a single
/// space; words longer than `width` are split.
pub fn wrap_text(text: &str, width: usize) -> String {
    let width = width.max(1);
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();

        while word.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }

        let needed = if current_len == 0 {
            word.len()
        } else {
            current_len + 1 + word.len()
        };
        if needed > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }

    if current_len > 0 {
        lines.push(current);
    }
    lines.join("\n")
}

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// `<dir>/<timestamp>-<id>.json`. The id keeps files written in the same
/// minute apart.
///
/// Characters outside `[A-Za-z0-9._-]` in `id` are replaced with `_`, so the
/// file always lands directly in `dir`.
pub fn output_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}-{}.json", timestamp_now(), sanitize_file_component(id)))
}

fn sanitize_file_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// The most recent formatted messages, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    capacity: usize,
    entries: VecDeque<String>,
}

impl ContextWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn push(&mut self, entry: String) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One archived discussion turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub name: String,
    pub text: String,
    pub model: String,
}

/// Persisted discussion transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub id: String,
    pub timestamp: String,
    pub users: Vec<String>,
    pub moderator: Option<String>,
    pub user_prompts: Vec<String>,
    pub moderator_prompt: Option<String>,
    pub ctx_length: usize,
    pub logs: Vec<TurnRecord>,
    /// Structured personas of `users`, in the same order.
    #[serde(default)]
    pub user_personas: Vec<Persona>,
    #[serde(default)]
    pub moderator_persona: Option<Persona>,
}

/// Persisted annotation of one transcript by one annotator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub conv_id: String,
    pub timestamp: String,
    pub annotator_model: String,
    pub annotator_prompt: String,
    pub ctx_length: usize,
    /// `(original message, annotation)` pairs, serialized as 2-element arrays.
    pub logs: Vec<(String, String)>,
    #[serde(default)]
    pub annotator_persona: Option<Persona>,
}

/// Write `value` as pretty JSON, creating missing parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SimulationError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SimulationError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
