//! Annotation engine.
//!
//! An [`AnnotationConv`] replays a finished transcript to an annotator actor,
//! one message at a time, and records the annotator's verdict for each one.

use std::fmt;
use std::path::Path;

use crate::actors::{Actor, ActorRole};
use crate::discussion::{check_role, RunState};
use crate::error::SimulationError;
use crate::transcript::{
    format_chat_message, read_json, timestamp_now, write_json, AnnotationRecord, ContextWindow,
    TranscriptRecord,
};

/// Default number of messages the annotator sees at once.
pub const DEFAULT_ANNOTATION_CONTEXT_LEN: usize = 2;

/// One annotator working through one transcript.
#[derive(Debug)]
pub struct AnnotationConv {
    annotator: Actor,
    transcript: TranscriptRecord,
    include_moderator_comments: bool,
    context: ContextWindow,
    logs: Vec<(String, String)>,
    state: RunState,
}

impl AnnotationConv {
    /// Create a job over an in-memory transcript.
    pub fn new(
        annotator: Actor,
        transcript: TranscriptRecord,
        include_moderator_comments: bool,
        history_context_len: usize,
    ) -> Result<Self, SimulationError> {
        check_role(&annotator, ActorRole::Annotator)?;
        Ok(Self {
            annotator,
            transcript,
            include_moderator_comments,
            context: ContextWindow::new(history_context_len),
            logs: Vec::new(),
            state: RunState::Fresh,
        })
    }

    /// Create a job over a transcript JSON file.
    pub fn from_transcript_file(
        annotator: Actor,
        path: &Path,
        include_moderator_comments: bool,
        history_context_len: usize,
    ) -> Result<Self, SimulationError> {
        let transcript: TranscriptRecord = read_json(path)?;
        Self::new(
            annotator,
            transcript,
            include_moderator_comments,
            history_context_len,
        )
    }

    pub fn conv_id(&self) -> &str {
        &self.transcript.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// `(original message, annotation)` pairs recorded so far.
    pub fn logs(&self) -> &[(String, String)] {
        &self.logs
    }

    fn is_moderator_turn(&self, speaker: &str) -> bool {
        self.transcript.moderator.as_deref() == Some(speaker)
    }

    /// Annotate every eligible message. May be called once.
    pub async fn begin(&mut self) -> Result<(), SimulationError> {
        if self.state == RunState::Concluded {
            return Err(SimulationError::AlreadyConcluded);
        }
        self.state = RunState::Concluded;

        tracing::info!(
            conv_id = %self.transcript.id,
            annotator = %self.annotator.name(),
            messages = self.transcript.logs.len(),
            include_moderator = self.include_moderator_comments,
            "Beginning annotation"
        );
        self.annotator.log_description(&self.transcript.id);

        for turn in &self.transcript.logs {
            if !self.include_moderator_comments && self.is_moderator_turn(&turn.name) {
                continue;
            }

            self.context.push(format_chat_message(&turn.name, &turn.text));
            let annotation = self.annotator.speak(&self.context.snapshot()).await?;
            tracing::debug!(
                conv_id = %self.transcript.id,
                speaker = %turn.name,
                annotation = %annotation,
                "Annotated message"
            );
            self.logs.push((turn.text.clone(), annotation));
        }

        tracing::info!(
            conv_id = %self.transcript.id,
            annotations = self.logs.len(),
            "Annotation concluded"
        );
        Ok(())
    }

    pub fn to_record(&self) -> AnnotationRecord {
        AnnotationRecord {
            conv_id: self.transcript.id.clone(),
            timestamp: timestamp_now(),
            annotator_model: self.annotator.model_name().to_string(),
            annotator_prompt: self.annotator.system_prompt(),
            ctx_length: self.context.capacity(),
            logs: self.logs.clone(),
            annotator_persona: Some(self.annotator.persona().clone()),
        }
    }

    pub fn to_json_file(&self, path: &Path) -> Result<(), SimulationError> {
        write_json(path, &self.to_record())?;
        tracing::info!(conv_id = %self.transcript.id, path = %path.display(), "Annotation saved");
        Ok(())
    }
}

impl fmt::Display for AnnotationConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string_pretty(&self.to_record()).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
