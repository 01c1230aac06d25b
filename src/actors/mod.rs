//! Simulated actors.
//!
//! An [`Actor`] binds a persona, a role and a shared model handle. It turns
//! the conversational history into a `(system, message)` prompt pair whose
//! shape depends on the role, and returns the model's cleaned reply.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::llm::{LanguageModel, PromptPair};
use crate::persona::Persona;

/// Stop sequences that keep the model inside its own turn.
pub const STOP_SEQUENCES: [&str; 3] = ["###", "\n\n", "User"];

/// Model identifier recorded for turns that were not generated.
pub const HARDCODED_MODEL: &str = "hardcoded";

/// What an actor does in a run. Decides the prompt shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Posts in a discussion (users and moderators).
    Participant,
    /// Labels the messages of a finished discussion.
    Annotator,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Participant => "participant",
            ActorRole::Annotator => "annotator",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ActorRole::Participant => "participant in an online discussion",
            ActorRole::Annotator => "annotator of online discussions",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured view of an actor's configuration, for audit and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorDescription {
    pub context: String,
    pub instructions: String,
    #[serde(rename = "type")]
    pub role: ActorRole,
    pub persona: Persona,
    /// The exact system prompt sent with every request.
    pub system_prompt: String,
}

/// A simulated participant or annotator.
#[derive(Debug, Clone)]
pub struct Actor {
    persona: Persona,
    role: ActorRole,
    model: Option<Arc<LanguageModel>>,
    context: String,
    instructions: String,
}

impl Actor {
    pub fn new(persona: Persona, role: ActorRole, model: Arc<LanguageModel>) -> Self {
        Self {
            persona,
            role,
            model: Some(model),
            context: String::new(),
            instructions: String::new(),
        }
    }

    /// Capability-less stand-in used to archive seed opinions.
    pub fn hardcoded(name: impl Into<String>) -> Self {
        Self {
            persona: Persona::named(name),
            role: ActorRole::Participant,
            model: None,
            context: String::new(),
            instructions: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.persona.username
    }

    pub fn role(&self) -> ActorRole {
        self.role
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Name of the backing model, or `"hardcoded"` for the pseudo-actor.
    pub fn model_name(&self) -> &str {
        self.model
            .as_ref()
            .map(|m| m.name())
            .unwrap_or(HARDCODED_MODEL)
    }

    /// The system-level prompt sent with every request.
    pub fn system_prompt(&self) -> String {
        let attributes = self.persona.to_attribute_list();
        let mut prompt = if attributes.is_empty() {
            format!("You are {}, a {}.", self.name(), self.role.label())
        } else {
            format!(
                "You are {}, a {} {}.",
                self.name(),
                attributes.join(", "),
                self.role.label()
            )
        };

        for part in [
            &self.context,
            &self.instructions,
            &self.persona.special_instructions,
        ] {
            let part = part.trim();
            if !part.is_empty() {
                prompt.push(' ');
                prompt.push_str(part);
            }
        }
        prompt
    }

    /// The message-level prompt for the given history.
    pub fn message_prompt(&self, history: &[String]) -> String {
        let joined = history.join("\n");
        match self.role {
            ActorRole::Participant => format!("{}\nUser {} posted:", joined, self.name()),
            ActorRole::Annotator => format!("Conversation so far:\n\n{}\nOutput:", joined),
        }
    }

    /// Structured summary of this actor. Does not touch the model.
    pub fn describe(&self) -> ActorDescription {
        ActorDescription {
            context: self.context.clone(),
            instructions: self.instructions.clone(),
            role: self.role,
            persona: self.persona.clone(),
            system_prompt: self.system_prompt(),
        }
    }

    /// Emit [`Actor::describe`] at debug level, tagged with the run id.
    pub fn log_description(&self, run_id: &str) {
        match serde_json::to_string(&self.describe()) {
            Ok(description) => tracing::debug!(
                run_id,
                actor = %self.name(),
                %description,
                "Actor configured"
            ),
            Err(e) => tracing::warn!(run_id, actor = %self.name(), error = %e, "Cannot describe actor"),
        }
    }

    /// Produce this actor's next message given the formatted history.
    pub async fn speak(&self, history: &[String]) -> Result<String, SimulationError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| SimulationError::MissingModel(self.name().to_string()))?;

        let prompt = PromptPair::new(self.system_prompt(), self.message_prompt(history));
        let response = model.prompt(prompt, &STOP_SEQUENCES).await?;
        tracing::trace!(actor = %self.name(), chars = response.len(), "Actor spoke");
        Ok(response)
    }
}
