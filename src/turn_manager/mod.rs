//! Turn-taking strategies.
//!
//! A [`TurnManager`] decides which participant of a discussion speaks next.
//! Managers are created uninitialized by [`turn_manager_factory`] and must be
//! given the participant roster exactly once before the first speaker is
//! requested.

mod random_weighted;
mod round_robin;

pub use random_weighted::{RandomWeighted, DEFAULT_RESPOND_PROBABILITY};
pub use round_robin::RoundRobin;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SimulationError};

/// Scheduling strategy of a turn manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TurnStrategy {
    /// Cycle the roster in order.
    RoundRobin,
    /// Let the last speaker reply with a fixed probability, else pick someone else.
    RandomWeighted,
}

impl TurnStrategy {
    pub const ALL: [TurnStrategy; 2] = [TurnStrategy::RoundRobin, TurnStrategy::RandomWeighted];

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStrategy::RoundRobin => "round_robin",
            TurnStrategy::RandomWeighted => "random_weighted",
        }
    }
}

impl fmt::Display for TurnStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "round_robin" => Ok(TurnStrategy::RoundRobin),
            "random_weighted" => Ok(TurnStrategy::RandomWeighted),
            _ => Err(ConfigError::UnknownTurnManager {
                name: s.to_string(),
                valid: TurnStrategy::ALL
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

impl TryFrom<String> for TurnStrategy {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TurnStrategy> for String {
    fn from(strategy: TurnStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

/// Strategy-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnManagerConfig {
    /// Probability that the last speaker speaks again (RandomWeighted only).
    #[serde(default)]
    pub respond_probability: Option<f64>,
    /// RNG seed for reproducible schedules (RandomWeighted only).
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TurnManagerConfig {
    pub fn with_respond_probability(mut self, p: f64) -> Self {
        self.respond_probability = Some(p);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Decides who speaks next in a discussion.
pub trait TurnManager: Send {
    /// Set the participant roster. May be called once.
    fn initialize(&mut self, names: &[String]) -> Result<(), SimulationError>;

    /// Name of the next speaker.
    fn next_speaker(&mut self) -> Result<String, SimulationError>;

    fn is_initialized(&self) -> bool;

    fn strategy(&self) -> TurnStrategy;
}

/// Create a fresh, uninitialized turn manager for `name`.
///
/// Names are matched case-insensitively against `round_robin` and
/// `random_weighted`.
pub fn turn_manager_factory(
    name: &str,
    config: &TurnManagerConfig,
) -> Result<Box<dyn TurnManager>, ConfigError> {
    let manager: Box<dyn TurnManager> = match name.parse::<TurnStrategy>()? {
        TurnStrategy::RoundRobin => Box::new(RoundRobin::new()),
        TurnStrategy::RandomWeighted => Box::new(RandomWeighted::new(config)?),
    };
    Ok(manager)
}

/// Shared roster checks run by every strategy on `initialize`.
pub(crate) fn validate_roster(names: &[String]) -> Result<(), ConfigError> {
    if names.is_empty() {
        return Err(ConfigError::EmptyRoster);
    }
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::DuplicateParticipant(name.clone()));
        }
    }
    Ok(())
}
