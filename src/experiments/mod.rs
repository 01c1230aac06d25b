//! Batch experiment runners.
//!
//! [`DiscussionExperiment`] samples topics and rosters from a pool and runs
//! many discussions; [`AnnotationExperiment`] runs every annotator over
//! every transcript in a directory. Instances run one after another. A
//! failing instance is logged with its parameters and skipped, and nothing
//! is written for it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::actors::{Actor, ActorRole};
use crate::annotation::AnnotationConv;
use crate::config::{AnnotationsConfig, DiscussionsConfig};
use crate::discussion::Conversation;
use crate::error::{ConfigError, SimulationError};
use crate::llm::LanguageModel;
use crate::persona::Persona;
use crate::transcript::output_path;
use crate::turn_manager::{turn_manager_factory, TurnManagerConfig, TurnStrategy};

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Files written by successful instances.
    pub outputs: Vec<PathBuf>,
}

impl ExperimentReport {
    fn record(&mut self, outcome: Option<PathBuf>) {
        match outcome {
            Some(path) => {
                self.succeeded += 1;
                self.outputs.push(path);
            }
            None => self.failed += 1,
        }
    }
}

fn create_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

// ============================================================================
// Discussions
// ============================================================================

/// Many randomized discussions over a shared persona pool.
#[derive(Debug, Clone)]
pub struct DiscussionExperiment {
    topics: Vec<String>,
    users: Vec<Actor>,
    moderator: Option<Actor>,
    strategy: TurnStrategy,
    turn_manager_config: TurnManagerConfig,
    history_context_len: usize,
    num_turns: usize,
    num_active_users: usize,
    num_discussions: usize,
    seed: Option<u64>,
}

impl DiscussionExperiment {
    pub fn new(topics: Vec<String>, users: Vec<Actor>) -> Self {
        Self {
            topics,
            users,
            moderator: None,
            strategy: TurnStrategy::RoundRobin,
            turn_manager_config: TurnManagerConfig::default(),
            history_context_len: 3,
            num_turns: 10,
            num_active_users: 2,
            num_discussions: 5,
            seed: None,
        }
    }

    /// Build actors from the config's persona pool, all sharing `model`.
    pub fn from_config(
        config: &DiscussionsConfig,
        model: Arc<LanguageModel>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let topics = config.load_topics()?;
        let instructions = config.load_user_instructions()?;

        let users = Persona::load_all(&config.user_personas_path)?
            .into_iter()
            .map(|persona| {
                Actor::new(persona, ActorRole::Participant, model.clone())
                    .with_context(config.context_prompt.clone())
                    .with_instructions(instructions.clone())
            })
            .collect();

        let mut experiment = Self::new(topics, users)
            .with_turn_manager(config.turn_manager, config.turn_manager_config.clone())
            .with_history_context_len(config.history_context_len)
            .with_num_turns(config.num_turns)
            .with_num_active_users(config.num_active_users)
            .with_num_discussions(config.num_discussions);

        if let Some(seed) = config.seed {
            experiment = experiment.with_seed(seed);
        }

        if let Some(moderator) = &config.moderator {
            if experiment.users.iter().any(|u| u.name() == moderator.username) {
                return Err(ConfigError::ValidationFailed(format!(
                    "moderator '{}' is also a user persona",
                    moderator.username
                )));
            }
            let mut persona = Persona::named(moderator.username.clone());
            persona.personality_characteristics = moderator.attributes.clone();
            let actor = Actor::new(persona, ActorRole::Participant, model)
                .with_context(config.context_prompt.clone())
                .with_instructions(moderator.load_instructions()?);
            experiment = experiment.with_moderator(actor);
        }

        Ok(experiment)
    }

    pub fn with_moderator(mut self, moderator: Actor) -> Self {
        self.moderator = Some(moderator);
        self
    }

    pub fn with_turn_manager(mut self, strategy: TurnStrategy, config: TurnManagerConfig) -> Self {
        self.strategy = strategy;
        self.turn_manager_config = config;
        self
    }

    pub fn with_history_context_len(mut self, len: usize) -> Self {
        self.history_context_len = len;
        self
    }

    pub fn with_num_turns(mut self, turns: usize) -> Self {
        self.num_turns = turns;
        self
    }

    pub fn with_num_active_users(mut self, users: usize) -> Self {
        self.num_active_users = users;
        self
    }

    pub fn with_num_discussions(mut self, discussions: usize) -> Self {
        self.num_discussions = discussions;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sample `num_discussions` fresh conversations. Each one gets a random
    /// topic as seed opinion, a random roster and a random seed author.
    pub fn generate(&self) -> Result<Vec<Conversation>, SimulationError> {
        if self.topics.is_empty() {
            return Err(ConfigError::ValidationFailed("no discussion topics".to_string()).into());
        }
        if self.num_active_users == 0 || self.num_active_users > self.users.len() {
            return Err(ConfigError::ValidationFailed(format!(
                "cannot pick {} active users from a pool of {}",
                self.num_active_users,
                self.users.len()
            ))
            .into());
        }

        let mut rng = create_rng(self.seed);
        let mut conversations = Vec::with_capacity(self.num_discussions);

        for index in 0..self.num_discussions {
            let topic = self
                .topics
                .choose(&mut rng)
                .cloned()
                .unwrap_or_default();

            let mut indices: Vec<usize> = (0..self.users.len()).collect();
            indices.shuffle(&mut rng);
            let roster: Vec<Actor> = indices[..self.num_active_users]
                .iter()
                .map(|&i| self.users[i].clone())
                .collect();

            let author = roster
                .choose(&mut rng)
                .map(|a| a.name().to_string())
                .unwrap_or_default();

            // Vary the schedule per discussion while keeping seeded runs reproducible.
            let mut tm_config = self.turn_manager_config.clone();
            if let Some(seed) = tm_config.seed {
                tm_config.seed = Some(seed.wrapping_add(index as u64));
            }
            let turn_manager = turn_manager_factory(self.strategy.as_str(), &tm_config)?;

            let mut builder = Conversation::builder()
                .participants(roster)
                .turn_manager(turn_manager)
                .history_context_len(self.history_context_len)
                .conv_len(self.num_turns)
                .seed_opinion(topic, author);
            if let Some(moderator) = &self.moderator {
                builder = builder.moderator(moderator.clone());
            }
            conversations.push(builder.build()?);
        }

        Ok(conversations)
    }

    /// Generate and run every discussion, writing transcripts to `output_dir`.
    pub async fn run(&self, output_dir: &Path) -> Result<ExperimentReport, SimulationError> {
        std::fs::create_dir_all(output_dir)?;
        let conversations = self.generate()?;
        let total = conversations.len();
        let mut report = ExperimentReport {
            total,
            ..Default::default()
        };

        tracing::info!(
            total,
            strategy = %self.strategy,
            output_dir = %output_dir.display(),
            "Starting discussion experiment"
        );

        for (index, mut conversation) in conversations.into_iter().enumerate() {
            tracing::info!(index = index + 1, total, conv_id = %conversation.id(), "Running discussion");
            let outcome = run_discussion(&mut conversation, output_dir).await;
            match outcome {
                Ok(path) => report.record(Some(path)),
                Err(e) => {
                    tracing::error!(
                        index = index + 1,
                        total,
                        conv_id = %conversation.id(),
                        participants = ?conversation.participant_names(),
                        error = %e,
                        "Discussion aborted"
                    );
                    report.record(None);
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Finished discussion experiment"
        );
        Ok(report)
    }
}

async fn run_discussion(
    conversation: &mut Conversation,
    output_dir: &Path,
) -> Result<PathBuf, SimulationError> {
    let start = Instant::now();
    conversation.begin().await?;
    let path = output_path(output_dir, &conversation.id().to_string());
    conversation.to_json_file(&path)?;
    tracing::debug!(
        conv_id = %conversation.id(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Discussion finished"
    );
    Ok(path)
}

// ============================================================================
// Annotations
// ============================================================================

/// Every annotator over every transcript in a directory.
#[derive(Debug, Clone)]
pub struct AnnotationExperiment {
    annotators: Vec<Actor>,
    history_context_len: usize,
    include_moderator_comments: bool,
}

impl AnnotationExperiment {
    pub fn new(
        annotators: Vec<Actor>,
        history_context_len: usize,
        include_moderator_comments: bool,
    ) -> Self {
        Self {
            annotators,
            history_context_len,
            include_moderator_comments,
        }
    }

    pub fn from_config(
        config: &AnnotationsConfig,
        model: Arc<LanguageModel>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let instructions = config.load_instructions()?;
        let annotators = Persona::load_all(&config.annotator_personas_path)?
            .into_iter()
            .map(|persona| {
                Actor::new(persona, ActorRole::Annotator, model.clone())
                    .with_context(config.context_prompt.clone())
                    .with_instructions(instructions.clone())
            })
            .collect();

        Ok(Self::new(
            annotators,
            config.history_context_len,
            config.include_moderator_comments,
        ))
    }

    /// Run all `(annotator, transcript)` pairs, annotator-major.
    pub async fn run(
        &self,
        discussions_dir: &Path,
        output_dir: &Path,
    ) -> Result<ExperimentReport, SimulationError> {
        if !discussions_dir.is_dir() {
            return Err(SimulationError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "discussions directory {} is not a directory",
                    discussions_dir.display()
                ),
            )));
        }
        std::fs::create_dir_all(output_dir)?;

        let transcripts = list_transcripts(discussions_dir)?;
        let total = self.annotators.len() * transcripts.len();
        let mut report = ExperimentReport {
            total,
            ..Default::default()
        };

        tracing::info!(
            annotators = self.annotators.len(),
            transcripts = transcripts.len(),
            output_dir = %output_dir.display(),
            "Starting annotation experiment"
        );

        let mut index = 0;
        for annotator in &self.annotators {
            for transcript in &transcripts {
                index += 1;
                tracing::info!(index, total, annotator = %annotator.name(), "Running annotation");
                match self.run_single(annotator, transcript, output_dir).await {
                    Ok(path) => report.record(Some(path)),
                    Err(e) => {
                        tracing::error!(
                            index,
                            total,
                            annotator = %annotator.name(),
                            transcript = %transcript.display(),
                            error = %e,
                            "Annotation aborted"
                        );
                        report.record(None);
                    }
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Finished annotation experiment"
        );
        Ok(report)
    }

    async fn run_single(
        &self,
        annotator: &Actor,
        transcript: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, SimulationError> {
        let mut job = AnnotationConv::from_transcript_file(
            annotator.clone(),
            transcript,
            self.include_moderator_comments,
            self.history_context_len,
        )?;
        job.begin().await?;
        let path = output_path(
            output_dir,
            &format!("{}-{}", annotator.name(), job.conv_id()),
        );
        job.to_json_file(&path)?;
        Ok(path)
    }
}

/// `.json` files directly inside `dir`, sorted by name.
fn list_transcripts(dir: &Path) -> Result<Vec<PathBuf>, SimulationError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| SimulationError::Io(io::Error::other(e.to_string())))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedProvider;
    use crate::transcript::{read_json, AnnotationRecord, TranscriptRecord};

    fn model(provider: &Arc<ScriptedProvider>) -> Arc<LanguageModel> {
        Arc::new(LanguageModel::new("llm", "llm", provider.clone()))
    }

    fn pool(names: &[&str], model: &Arc<LanguageModel>) -> Vec<Actor> {
        names
            .iter()
            .map(|n| Actor::new(Persona::named(*n), ActorRole::Participant, model.clone()))
            .collect()
    }

    #[test]
    fn test_generate_samples_rosters_from_pool() {
        let provider = Arc::new(ScriptedProvider::new(vec!["x"]));
        let m = model(&provider);
        let experiment = DiscussionExperiment::new(
            vec!["topic one".to_string(), "topic two".to_string()],
            pool(&["a", "b", "c", "d"], &m),
        )
        .with_num_active_users(3)
        .with_num_discussions(4)
        .with_seed(11);

        let conversations = experiment.generate().expect("generate");
        assert_eq!(conversations.len(), 4);
        for conv in &conversations {
            let names = conv.participant_names();
            assert_eq!(names.len(), 3);
            assert!(names.iter().all(|n| ["a", "b", "c", "d"].contains(&n.as_str())));
        }
    }

    #[test]
    fn test_generate_rejects_oversized_roster() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let m = model(&provider);
        let experiment = DiscussionExperiment::new(vec!["t".to_string()], pool(&["a"], &m))
            .with_num_active_users(2);
        assert!(matches!(
            experiment.generate(),
            Err(SimulationError::Config(ConfigError::ValidationFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_discussion_run_writes_transcripts() {
        let provider = Arc::new(ScriptedProvider::new(vec!["I agree.", "I disagree."]));
        let m = model(&provider);
        let experiment = DiscussionExperiment::new(vec!["A topic".to_string()], pool(&["a", "b"], &m))
            .with_num_turns(3)
            .with_num_discussions(2)
            .with_seed(5);

        let dir = tempfile::tempdir().expect("tempdir");
        let report = experiment.run(dir.path()).await.expect("run");

        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        for path in &report.outputs {
            let record: TranscriptRecord = read_json(path).expect("transcript");
            assert_eq!(record.logs.len(), 4);
            assert_eq!(record.logs[0].text, "A topic");
            assert_eq!(record.logs[0].model, "hardcoded");
        }
        assert_ne!(report.outputs[0], report.outputs[1]);
    }

    #[tokio::test]
    async fn test_discussion_failures_are_isolated() {
        let provider = Arc::new(ScriptedProvider::failing());
        let m = model(&provider);
        let experiment = DiscussionExperiment::new(vec!["t".to_string()], pool(&["a", "b"], &m))
            .with_num_discussions(3);

        let dir = tempfile::tempdir().expect("tempdir");
        let report = experiment.run(dir.path()).await.expect("run");

        assert_eq!(report.failed, 3);
        assert!(report.outputs.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).expect("read_dir").count(), 0);
    }

    #[tokio::test]
    async fn test_annotation_run_over_directory() {
        let provider = Arc::new(ScriptedProvider::new(vec!["reply"]));
        let m = model(&provider);
        let discussions = tempfile::tempdir().expect("tempdir");
        let experiment = DiscussionExperiment::new(vec!["topic".to_string()], pool(&["a", "b"], &m))
            .with_num_turns(2)
            .with_num_discussions(2);
        experiment.run(discussions.path()).await.expect("discussions");
        std::fs::write(discussions.path().join("notes.txt"), "ignored").expect("write");
        std::fs::write(discussions.path().join("broken.json"), "{").expect("write");

        let annot_provider = Arc::new(ScriptedProvider::new(vec!["toxicity=1"]));
        let annot_model = model(&annot_provider);
        let annotators = vec![
            Actor::new(Persona::named("ann1"), ActorRole::Annotator, annot_model.clone()),
            Actor::new(Persona::named("ann2"), ActorRole::Annotator, annot_model),
        ];
        let annotation = AnnotationExperiment::new(annotators, 2, true);

        let output = tempfile::tempdir().expect("tempdir");
        let report = annotation
            .run(discussions.path(), output.path())
            .await
            .expect("annotations");

        assert_eq!(report.total, 6);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 2);
        for path in &report.outputs {
            let record: AnnotationRecord = read_json(path).expect("annotation");
            assert_eq!(record.logs.len(), 3);
            assert!(record.logs.iter().all(|(_, a)| a == "toxicity=1"));
        }
    }

    #[tokio::test]
    async fn test_annotator_name_cannot_escape_output_dir() {
        let provider = Arc::new(ScriptedProvider::new(vec!["reply"]));
        let m = model(&provider);
        let discussions = tempfile::tempdir().expect("tempdir");
        DiscussionExperiment::new(vec!["topic".to_string()], pool(&["a", "b"], &m))
            .with_num_turns(1)
            .with_num_discussions(1)
            .run(discussions.path())
            .await
            .expect("discussions");

        let annotators = vec![Actor::new(
            Persona::named("team/ann"),
            ActorRole::Annotator,
            m.clone(),
        )];
        let output = tempfile::tempdir().expect("tempdir");
        let report = AnnotationExperiment::new(annotators, 2, true)
            .run(discussions.path(), output.path())
            .await
            .expect("annotations");

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.outputs[0].parent(), Some(output.path()));
        let entries: Vec<_> = std::fs::read_dir(output.path())
            .expect("read_dir")
            .filter_map(Result::ok)
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path().is_file());
    }

    #[test]
    fn test_moderator_sharing_a_user_name_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let personas = dir.path().join("users.json");
        std::fs::write(&personas, r#"[{"username": "alice"}, {"username": "bob"}]"#)
            .expect("write");

        let yaml = format!(
            "topics: [\"t\"]\nuser_personas_path: {}\nmoderator:\n  username: bob\noutput_dir: out\n",
            personas.display()
        );
        let config: DiscussionsConfig = serde_yaml::from_str(&yaml).expect("valid yaml");
        let provider = Arc::new(ScriptedProvider::new(vec![]));

        let err = DiscussionExperiment::from_config(&config, model(&provider)).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(msg) if msg.contains("bob")));

        let yaml = yaml.replace("username: bob", "username: mod");
        let config: DiscussionsConfig = serde_yaml::from_str(&yaml).expect("valid yaml");
        let experiment = DiscussionExperiment::from_config(&config, model(&provider))
            .expect("distinct moderator");
        assert_eq!(experiment.generate().expect("generate").len(), 5);
    }

    #[tokio::test]
    async fn test_annotation_requires_directory() {
        let annotation = AnnotationExperiment::new(vec![], 2, true);
        let output = tempfile::tempdir().expect("tempdir");
        let result = annotation
            .run(Path::new("/nonexistent/discussions"), output.path())
            .await;
        assert!(matches!(result, Err(SimulationError::Io(_))));
    }
}
