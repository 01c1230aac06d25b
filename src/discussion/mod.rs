//! Discussion engine.
//!
//! A [`Conversation`] drives a multi-actor dialogue: an optional seed opinion
//! opens the thread, then the turn manager picks a participant for each of
//! `conv_len` rounds. A configured moderator answers after every non-empty
//! participant turn without consuming a round. A conversation can be driven
//! exactly once.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use uuid::Uuid;

use crate::actors::{Actor, ActorRole};
use crate::error::{ConfigError, SimulationError};
use crate::transcript::{
    format_chat_message, timestamp_now, write_json, ContextWindow, TranscriptRecord, TurnRecord,
};
use crate::turn_manager::{RoundRobin, TurnManager};

/// Default number of formatted messages kept in the prompt history.
pub const DEFAULT_HISTORY_CONTEXT_LEN: usize = 5;

/// Default number of participant rounds.
pub const DEFAULT_CONV_LEN: usize = 5;

// ============================================================================
// State
// ============================================================================

/// Lifecycle of a conversation or annotation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Fresh,
    Concluded,
}

/// A hardcoded opening message attributed to one of the participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedOpinion {
    pub text: String,
    pub author: String,
}

// ============================================================================
// Conversation
// ============================================================================

/// A single simulated discussion.
pub struct Conversation {
    id: Uuid,
    participants: Vec<Actor>,
    moderator: Option<Actor>,
    turn_manager: Box<dyn TurnManager>,
    conv_len: usize,
    context: ContextWindow,
    seed: Option<SeedOpinion>,
    logs: Vec<TurnRecord>,
    state: RunState,
}

impl Conversation {
    pub fn builder() -> ConversationBuilder {
        ConversationBuilder::new()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn logs(&self) -> &[TurnRecord] {
        &self.logs
    }

    /// Current contents of the context window, oldest first.
    pub fn context(&self) -> Vec<String> {
        self.context.snapshot()
    }

    pub fn conv_len(&self) -> usize {
        self.conv_len
    }

    pub fn participant_names(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Run the discussion. Fails with [`SimulationError::AlreadyConcluded`]
    /// on every call after the first, even if the first one failed.
    pub async fn begin(&mut self) -> Result<(), SimulationError> {
        if self.state == RunState::Concluded {
            return Err(SimulationError::AlreadyConcluded);
        }
        self.state = RunState::Concluded;

        tracing::info!(
            conv_id = %self.id,
            participants = self.participants.len(),
            moderated = self.moderator.is_some(),
            conv_len = self.conv_len,
            "Beginning conversation"
        );
        for actor in self.participants.iter().chain(self.moderator.iter()) {
            actor.log_description(&self.id.to_string());
        }

        match self.seed.clone() {
            Some(seed) if !seed.text.trim().is_empty() => {
                let pseudo = Actor::hardcoded(seed.author.as_str());
                self.archive(pseudo.name(), pseudo.model_name(), seed.text);
            }
            _ => tracing::info!(conv_id = %self.id, "No seed opinion provided"),
        }

        for round in 0..self.conv_len {
            let speaker = self.turn_manager.next_speaker()?;
            let actor = self
                .participants
                .iter()
                .find(|a| a.name() == speaker)
                .ok_or_else(|| SimulationError::UnknownSpeaker(speaker.clone()))?;

            let response = actor.speak(&self.context.snapshot()).await?;
            let model = actor.model_name().to_string();

            if !self.archive(&speaker, &model, response) {
                tracing::debug!(conv_id = %self.id, round, speaker = %speaker, "Silent turn skipped");
                continue;
            }

            let moderated = match &self.moderator {
                Some(moderator) => {
                    let text = moderator.speak(&self.context.snapshot()).await?;
                    Some((
                        moderator.name().to_string(),
                        moderator.model_name().to_string(),
                        text,
                    ))
                }
                None => None,
            };
            if let Some((name, model, text)) = moderated {
                self.archive(&name, &model, text);
            }
        }

        tracing::info!(conv_id = %self.id, turns = self.logs.len(), "Conversation concluded");
        Ok(())
    }

    /// Log a turn and push it into the context window. Blank text is
    /// dropped and `false` returned.
    fn archive(&mut self, name: &str, model: &str, text: String) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let formatted = format_chat_message(name, &text);
        tracing::debug!(conv_id = %self.id, "{}", formatted);
        self.context.push(formatted);
        self.logs.push(TurnRecord {
            name: name.to_string(),
            text,
            model: model.to_string(),
        });
        true
    }

    pub fn to_record(&self) -> TranscriptRecord {
        TranscriptRecord {
            id: self.id.to_string(),
            timestamp: timestamp_now(),
            users: self.participant_names(),
            moderator: self.moderator.as_ref().map(|m| m.name().to_string()),
            user_prompts: self.participants.iter().map(Actor::system_prompt).collect(),
            moderator_prompt: self.moderator.as_ref().map(Actor::system_prompt),
            ctx_length: self.context.capacity(),
            logs: self.logs.clone(),
            user_personas: self.participants.iter().map(|a| a.persona().clone()).collect(),
            moderator_persona: self.moderator.as_ref().map(|m| m.persona().clone()),
        }
    }

    /// Write the transcript, creating missing parent directories.
    pub fn to_json_file(&self, path: &Path) -> Result<(), SimulationError> {
        write_json(path, &self.to_record())?;
        tracing::info!(conv_id = %self.id, path = %path.display(), "Conversation saved");
        Ok(())
    }
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string_pretty(&self.to_record()).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("participants", &self.participant_names())
            .field("strategy", &self.turn_manager.strategy())
            .field("conv_len", &self.conv_len)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder Pattern
// ============================================================================

/// Validating builder for [`Conversation`].
pub struct ConversationBuilder {
    participants: Vec<Actor>,
    moderator: Option<Actor>,
    turn_manager: Option<Box<dyn TurnManager>>,
    history_context_len: usize,
    conv_len: usize,
    seed: Option<SeedOpinion>,
}

impl ConversationBuilder {
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            moderator: None,
            turn_manager: None,
            history_context_len: DEFAULT_HISTORY_CONTEXT_LEN,
            conv_len: DEFAULT_CONV_LEN,
            seed: None,
        }
    }

    pub fn participants(mut self, participants: Vec<Actor>) -> Self {
        self.participants = participants;
        self
    }

    pub fn moderator(mut self, moderator: Actor) -> Self {
        self.moderator = Some(moderator);
        self
    }

    /// Defaults to round robin when unset.
    pub fn turn_manager(mut self, manager: Box<dyn TurnManager>) -> Self {
        self.turn_manager = Some(manager);
        self
    }

    pub fn history_context_len(mut self, len: usize) -> Self {
        self.history_context_len = len;
        self
    }

    pub fn conv_len(mut self, len: usize) -> Self {
        self.conv_len = len;
        self
    }

    pub fn seed_opinion(mut self, text: impl Into<String>, author: impl Into<String>) -> Self {
        self.seed = Some(SeedOpinion {
            text: text.into(),
            author: author.into(),
        });
        self
    }

    pub fn build(self) -> Result<Conversation, SimulationError> {
        if self.participants.is_empty() {
            return Err(ConfigError::EmptyRoster.into());
        }

        let mut seen = HashSet::new();
        for actor in &self.participants {
            check_role(actor, ActorRole::Participant)?;
            if !seen.insert(actor.name()) {
                return Err(ConfigError::DuplicateParticipant(actor.name().to_string()).into());
            }
        }

        if let Some(moderator) = &self.moderator {
            check_role(moderator, ActorRole::Participant)?;
            if seen.contains(moderator.name()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "moderator '{}' is also a participant",
                    moderator.name()
                ))
                .into());
            }
        }

        if let Some(seed) = &self.seed {
            if !seen.contains(seed.author.as_str()) {
                return Err(ConfigError::UnknownSeedAuthor(seed.author.clone()).into());
            }
        }

        let names: Vec<String> = self
            .participants
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        let mut turn_manager = match self.turn_manager {
            Some(manager) => manager,
            None => {
                tracing::info!("No turn manager selected, defaulting to round robin");
                Box::new(RoundRobin::new())
            }
        };
        if !turn_manager.is_initialized() {
            turn_manager.initialize(&names)?;
        }

        Ok(Conversation {
            id: Uuid::new_v4(),
            participants: self.participants,
            moderator: self.moderator,
            turn_manager,
            conv_len: self.conv_len,
            context: ContextWindow::new(self.history_context_len),
            seed: self.seed,
            logs: Vec::new(),
            state: RunState::Fresh,
        })
    }
}

impl Default for ConversationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn check_role(actor: &Actor, expected: ActorRole) -> Result<(), ConfigError> {
    if actor.role() != expected {
        return Err(ConfigError::RoleMismatch {
            name: actor.name().to_string(),
            expected: expected.to_string(),
            actual: actor.role().to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedProvider;
    use crate::llm::LanguageModel;
    use crate::persona::Persona;
    use crate::turn_manager::{turn_manager_factory, TurnManagerConfig};
    use std::sync::Arc;

    fn model(provider: &Arc<ScriptedProvider>, name: &str) -> Arc<LanguageModel> {
        Arc::new(LanguageModel::new(name, name, provider.clone()))
    }

    fn participant(name: &str, model: &Arc<LanguageModel>) -> Actor {
        Actor::new(Persona::named(name), ActorRole::Participant, model.clone())
    }

    fn users(names: &[&str], model: &Arc<LanguageModel>) -> Vec<Actor> {
        names.iter().map(|n| participant(n, model)).collect()
    }

    #[tokio::test]
    async fn test_round_robin_discussion_logs_every_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec!["one", "two", "three"]));
        let m = model(&provider, "llm");
        let mut conv = Conversation::builder()
            .participants(users(&["A", "B", "C"], &m))
            .conv_len(4)
            .build()
            .expect("valid conversation");

        conv.begin().await.expect("begin");

        let speakers: Vec<&str> = conv.logs().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(speakers, vec!["A", "B", "C", "A"]);
        assert_eq!(conv.logs()[3].text, "one");
        assert!(conv.logs().iter().all(|t| t.model == "llm"));
        assert_eq!(provider.call_count(), 4);
        assert_eq!(conv.state(), RunState::Concluded);
    }

    #[tokio::test]
    async fn test_begin_twice_fails_and_keeps_log() {
        let provider = Arc::new(ScriptedProvider::new(vec!["hi"]));
        let m = model(&provider, "llm");
        let mut conv = Conversation::builder()
            .participants(users(&["A", "B"], &m))
            .conv_len(2)
            .build()
            .expect("valid conversation");

        conv.begin().await.expect("first begin");
        let before = conv.logs().to_vec();

        assert!(matches!(
            conv.begin().await,
            Err(SimulationError::AlreadyConcluded)
        ));
        assert_eq!(conv.logs(), before.as_slice());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_drive_still_concludes() {
        let provider = Arc::new(ScriptedProvider::failing());
        let m = model(&provider, "llm");
        let mut conv = Conversation::builder()
            .participants(users(&["A"], &m))
            .build()
            .expect("valid conversation");

        assert!(matches!(conv.begin().await, Err(SimulationError::Llm(_))));
        assert!(matches!(
            conv.begin().await,
            Err(SimulationError::AlreadyConcluded)
        ));
    }

    #[tokio::test]
    async fn test_context_window_holds_last_entries() {
        let provider = Arc::new(ScriptedProvider::new(vec!["m1", "m2", "m3", "m4", "m5"]));
        let m = model(&provider, "llm");
        let mut conv = Conversation::builder()
            .participants(users(&["A", "B"], &m))
            .history_context_len(2)
            .conv_len(5)
            .build()
            .expect("valid conversation");

        conv.begin().await.expect("begin");

        assert_eq!(conv.logs().len(), 5);
        assert_eq!(
            conv.context(),
            vec![
                "User B posted:\nm4".to_string(),
                "User A posted:\nm5".to_string(),
            ]
        );

        // The last prompt only saw the two most recent entries.
        let prompts = provider.user_prompts();
        assert_eq!(
            prompts[4],
            "User A posted:\nm3\nUser B posted:\nm4\nUser A posted:"
        );
    }

    #[tokio::test]
    async fn test_silent_turn_skips_log_context_and_moderator() {
        let user_provider = Arc::new(ScriptedProvider::new(vec!["   ", "real words"]));
        let mod_provider = Arc::new(ScriptedProvider::new(vec!["Please stay civil."]));
        let user_model = model(&user_provider, "user-llm");
        let mod_model = model(&mod_provider, "mod-llm");

        let mut conv = Conversation::builder()
            .participants(users(&["A", "B"], &user_model))
            .moderator(participant("mod", &mod_model))
            .conv_len(2)
            .build()
            .expect("valid conversation");

        conv.begin().await.expect("begin");

        let names: Vec<&str> = conv.logs().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["B", "mod"]);
        assert_eq!(conv.logs()[1].model, "mod-llm");
        assert_eq!(mod_provider.call_count(), 1);
        assert_eq!(conv.context().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_moderator_reply_is_dropped() {
        let user_provider = Arc::new(ScriptedProvider::new(vec!["hello"]));
        let mod_provider = Arc::new(ScriptedProvider::new(vec![""]));
        let user_model = model(&user_provider, "u");
        let mod_model = model(&mod_provider, "m");

        let mut conv = Conversation::builder()
            .participants(users(&["A"], &user_model))
            .moderator(participant("mod", &mod_model))
            .conv_len(3)
            .build()
            .expect("valid conversation");

        conv.begin().await.expect("begin");
        assert_eq!(conv.logs().len(), 3);
        assert!(conv.logs().iter().all(|t| t.name == "A"));
        assert_eq!(mod_provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_seed_opinion_is_first_and_off_budget() {
        let provider = Arc::new(ScriptedProvider::new(vec!["reply"]));
        let m = model(&provider, "llm");
        let mut conv = Conversation::builder()
            .participants(users(&["A", "B"], &m))
            .conv_len(3)
            .seed_opinion("Cats are better than dogs.", "B")
            .build()
            .expect("valid conversation");

        conv.begin().await.expect("begin");

        assert_eq!(conv.logs().len(), 4);
        let first = &conv.logs()[0];
        assert_eq!(first.name, "B");
        assert_eq!(first.text, "Cats are better than dogs.");
        assert_eq!(first.model, "hardcoded");
        assert_eq!(provider.call_count(), 3);
        assert!(provider.user_prompts()[0].starts_with("User B posted:\nCats are better"));
    }

    #[tokio::test]
    async fn test_blank_seed_is_ignored() {
        let provider = Arc::new(ScriptedProvider::new(vec!["reply"]));
        let m = model(&provider, "llm");
        let mut conv = Conversation::builder()
            .participants(users(&["A"], &m))
            .conv_len(1)
            .seed_opinion("  ", "A")
            .build()
            .expect("valid conversation");

        conv.begin().await.expect("begin");
        assert_eq!(conv.logs().len(), 1);
        assert_eq!(conv.logs()[0].model, "llm");
    }

    #[test]
    fn test_builder_validation() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let m = model(&provider, "llm");

        assert!(matches!(
            Conversation::builder().build(),
            Err(SimulationError::Config(ConfigError::EmptyRoster))
        ));
        assert!(matches!(
            Conversation::builder()
                .participants(users(&["A", "A"], &m))
                .build(),
            Err(SimulationError::Config(ConfigError::DuplicateParticipant(_)))
        ));
        assert!(matches!(
            Conversation::builder()
                .participants(users(&["A"], &m))
                .moderator(participant("A", &m))
                .build(),
            Err(SimulationError::Config(ConfigError::ValidationFailed(_)))
        ));
        assert!(matches!(
            Conversation::builder()
                .participants(users(&["A"], &m))
                .seed_opinion("hi", "Z")
                .build(),
            Err(SimulationError::Config(ConfigError::UnknownSeedAuthor(_)))
        ));

        let annotator = Actor::new(Persona::named("X"), ActorRole::Annotator, m.clone());
        assert!(matches!(
            Conversation::builder().participants(vec![annotator]).build(),
            Err(SimulationError::Config(ConfigError::RoleMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_speaker_from_preinitialized_manager() {
        let provider = Arc::new(ScriptedProvider::new(vec!["x"]));
        let m = model(&provider, "llm");
        let mut manager =
            turn_manager_factory("round_robin", &TurnManagerConfig::default()).expect("factory");
        manager
            .initialize(&["ghost".to_string()])
            .expect("init");

        let mut conv = Conversation::builder()
            .participants(users(&["A"], &m))
            .turn_manager(manager)
            .conv_len(1)
            .build()
            .expect("valid conversation");

        assert!(matches!(
            conv.begin().await,
            Err(SimulationError::UnknownSpeaker(name)) if name == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_record_and_display() {
        let provider = Arc::new(ScriptedProvider::new(vec!["hey"]));
        let m = model(&provider, "llm");
        let mut conv = Conversation::builder()
            .participants(users(&["A", "B"], &m))
            .moderator(participant("mod", &m))
            .history_context_len(7)
            .conv_len(1)
            .build()
            .expect("valid conversation");
        conv.begin().await.expect("begin");

        let record = conv.to_record();
        assert_eq!(record.id, conv.id().to_string());
        assert_eq!(record.users, vec!["A", "B"]);
        assert_eq!(record.moderator.as_deref(), Some("mod"));
        assert_eq!(record.user_prompts.len(), 2);
        assert!(record.user_prompts[0].starts_with("You are A"));
        assert!(record
            .moderator_prompt
            .as_deref()
            .is_some_and(|p| p.starts_with("You are mod")));
        assert_eq!(record.ctx_length, 7);
        assert_eq!(record.logs.len(), 2);

        let rendered = conv.to_string();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).expect("json");
        assert_eq!(parsed["ctx_length"], 7);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out/conv.json");
        conv.to_json_file(&path).expect("write");
        assert!(path.exists());
    }
}
