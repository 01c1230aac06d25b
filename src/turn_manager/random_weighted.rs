use rand::seq::IndexedRandom;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{validate_roster, TurnManager, TurnManagerConfig, TurnStrategy};
use crate::error::{ConfigError, SimulationError};

/// Respond probability used when none is configured.
pub const DEFAULT_RESPOND_PROBABILITY: f64 = 0.5;

/// Lets the last speaker reply again with probability `p`, otherwise hands
/// the turn to a uniformly chosen other participant.
#[derive(Debug)]
pub struct RandomWeighted {
    respond_probability: f64,
    names: Vec<String>,
    last_speaker: Option<String>,
    initialized: bool,
    rng: ChaCha8Rng,
}

impl RandomWeighted {
    /// Build from config. `p` must satisfy `0 < p < 1`; a missing value
    /// falls back to [`DEFAULT_RESPOND_PROBABILITY`].
    pub fn new(config: &TurnManagerConfig) -> Result<Self, ConfigError> {
        let respond_probability = match config.respond_probability {
            Some(p) if p > 0.0 && p < 1.0 => p,
            Some(p) => return Err(ConfigError::InvalidProbability(p)),
            None => {
                tracing::warn!(
                    default = DEFAULT_RESPOND_PROBABILITY,
                    "No respond_probability set for RandomWeighted turn manager, using default"
                );
                DEFAULT_RESPOND_PROBABILITY
            }
        };

        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };

        Ok(Self {
            respond_probability,
            names: Vec::new(),
            last_speaker: None,
            initialized: false,
            rng,
        })
    }

    pub fn respond_probability(&self) -> f64 {
        self.respond_probability
    }

    fn pick_other(&mut self) -> String {
        let others: Vec<&String> = self
            .names
            .iter()
            .filter(|n| Some(n.as_str()) != self.last_speaker.as_deref())
            .collect();

        match others.choose(&mut self.rng) {
            Some(name) => (*name).clone(),
            // Single participant: nobody else to hand over to.
            None => self.names[0].clone(),
        }
    }
}

impl TurnManager for RandomWeighted {
    fn initialize(&mut self, names: &[String]) -> Result<(), SimulationError> {
        if self.initialized {
            return Err(SimulationError::TurnManagerAlreadyInitialized);
        }
        validate_roster(names)?;
        self.names = names.to_vec();
        self.initialized = true;
        Ok(())
    }

    fn next_speaker(&mut self) -> Result<String, SimulationError> {
        if !self.initialized {
            return Err(SimulationError::TurnManagerUninitialized);
        }

        let next = match self.last_speaker.clone() {
            None => self.pick_other(),
            Some(last) => {
                let roll: f64 = self.rng.random_range(0.0..1.0);
                if roll < self.respond_probability {
                    last
                } else {
                    self.pick_other()
                }
            }
        };

        self.last_speaker = Some(next.clone());
        Ok(next)
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn strategy(&self) -> TurnStrategy {
        TurnStrategy::RandomWeighted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn seeded(p: f64, seed: u64) -> RandomWeighted {
        let config = TurnManagerConfig::default()
            .with_respond_probability(p)
            .with_seed(seed);
        RandomWeighted::new(&config).expect("valid config")
    }

    #[test]
    fn test_probability_bounds() {
        for p in [0.0, 1.0, -0.2, 1.5] {
            let config = TurnManagerConfig::default().with_respond_probability(p);
            assert!(matches!(
                RandomWeighted::new(&config),
                Err(ConfigError::InvalidProbability(_))
            ));
        }
    }

    #[test]
    fn test_default_probability() {
        let rw = RandomWeighted::new(&TurnManagerConfig::default()).expect("default config");
        assert_eq!(rw.respond_probability(), DEFAULT_RESPOND_PROBABILITY);
    }

    #[test]
    fn test_only_roster_members_are_selected() {
        let roster = names(&["alice", "bob", "carol"]);
        let mut rw = seeded(0.4, 7);
        rw.initialize(&roster).expect("init");

        for _ in 0..200 {
            let speaker = rw.next_speaker().expect("speaker");
            assert!(roster.contains(&speaker));
        }
    }

    fn repeat_rate(p: f64, seed: u64, trials: usize) -> f64 {
        let mut rw = seeded(p, seed);
        rw.initialize(&names(&["a", "b", "c", "d"])).expect("init");

        let mut last = rw.next_speaker().expect("speaker");
        let mut repeats = 0;
        for _ in 0..trials {
            let next = rw.next_speaker().expect("speaker");
            if next == last {
                repeats += 1;
            }
            last = next;
        }
        repeats as f64 / trials as f64
    }

    #[test]
    fn test_repeat_rate_converges_to_probability() {
        let p = 0.3;
        let rate = repeat_rate(p, 42, 20_000);
        assert!((rate - p).abs() < 0.03, "repeat rate {rate} too far from {p}");
    }

    #[test]
    fn test_near_one_probability_keeps_speaker() {
        let rate = repeat_rate(0.999, 11, 20_000);
        assert!(rate > 0.99, "repeat rate {rate} should be close to 1");
    }

    #[test]
    fn test_near_zero_probability_changes_speaker() {
        let rate = repeat_rate(0.001, 13, 20_000);
        assert!(rate < 0.01, "repeat rate {rate} should be close to 0");
    }

    #[test]
    fn test_same_seed_same_schedule() {
        let roster = names(&["a", "b", "c"]);
        let mut first = seeded(0.5, 99);
        let mut second = seeded(0.5, 99);
        first.initialize(&roster).expect("init");
        second.initialize(&roster).expect("init");

        for _ in 0..50 {
            assert_eq!(
                first.next_speaker().expect("speaker"),
                second.next_speaker().expect("speaker")
            );
        }
    }

    #[test]
    fn test_single_participant_always_returned() {
        let mut rw = seeded(0.1, 3);
        rw.initialize(&names(&["solo"])).expect("init");
        for _ in 0..20 {
            assert_eq!(rw.next_speaker().expect("speaker"), "solo");
        }
    }

    #[test]
    fn test_uninitialized_and_double_init() {
        let mut rw = seeded(0.5, 1);
        assert!(matches!(
            rw.next_speaker(),
            Err(SimulationError::TurnManagerUninitialized)
        ));
        rw.initialize(&names(&["a", "b"])).expect("init");
        assert!(matches!(
            rw.initialize(&names(&["a", "b"])),
            Err(SimulationError::TurnManagerAlreadyInitialized)
        ));
    }
}
